//! Options order handlers: single-leg orders, multi-leg strategy
//! synthesis, and symbolic expiry resolution.
//!
//! Symbolic strike offsets (`ATM`, `OTM5`, …) are opaque to the engine and
//! resolved by the gateway. Expiry types (`current_week`, `next_month`, …)
//! are resolved here against the gateway's expiry list.

use chrono::{Datelike, Local, NaiveDate};
use serde_json::{Map, Value};

use super::{HandlerReport, NodeExecutor};
use crate::gateway::types::{OptionLeg, OptionsOrderRequest};

/// Quantity per lot for the indices the gateway trades. Unknown
/// underlyings fall back to the NIFTY lot.
pub(crate) fn lot_size(underlying: &str) -> i64 {
    match underlying {
        "NIFTY" => 75,
        "BANKNIFTY" => 30,
        "FINNIFTY" => 65,
        "MIDCPNIFTY" => 120,
        "NIFTYNXT50" => 25,
        "SENSEX" => 20,
        "BANKEX" => 30,
        "SENSEX50" => 25,
        _ => 75,
    }
}

/// `(underlying exchange, futures/options exchange)` for an index.
pub(crate) fn index_exchanges(underlying: &str) -> (&'static str, &'static str) {
    match underlying {
        "SENSEX" | "BANKEX" | "SENSEX50" => ("BSE_INDEX", "BFO"),
        _ => ("NSE_INDEX", "NFO"),
    }
}

/// Parse one expiry list entry. The gateway emits either `10-JUL-25` or
/// `25DEC25`.
pub(crate) fn parse_expiry(entry: &str) -> Option<NaiveDate> {
    let upper = entry.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }
    for format in ["%d-%b-%y", "%d%b%y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&upper, format) {
            return Some(date);
        }
    }
    None
}

/// Canonical API form: dashes removed, uppercase (`10-JUL-25` → `10JUL25`).
pub(crate) fn format_expiry_for_api(expiry: &str) -> String {
    expiry.replace('-', "").to_uppercase()
}

/// Choose an expiry from the parsed, ascending-sorted list:
/// first for `current_week`, second for `next_week`, last entry inside the
/// current/next calendar month for the month selectors.
pub(crate) fn select_expiry(
    sorted: &[(String, NaiveDate)],
    expiry_type: &str,
    today: NaiveDate,
) -> Option<String> {
    let (current_month, current_year) = (today.month(), today.year());
    let (next_month, next_year) = if current_month == 12 {
        (1, current_year + 1)
    } else {
        (current_month + 1, current_year)
    };

    match expiry_type {
        "current_week" => sorted.first().map(|(raw, _)| raw.clone()),
        "next_week" => sorted.get(1).map(|(raw, _)| raw.clone()),
        "current_month" => sorted
            .iter()
            .filter(|(_, date)| date.month() == current_month && date.year() == current_year)
            .next_back()
            .map(|(raw, _)| raw.clone()),
        "next_month" => sorted
            .iter()
            .filter(|(_, date)| date.month() == next_month && date.year() == next_year)
            .next_back()
            .map(|(raw, _)| raw.clone()),
        _ => None,
    }
}

/// Synthesize the leg list for a named strategy. Unknown strategies yield
/// an empty list.
pub(crate) fn build_strategy_legs(
    strategy: &str,
    action: &str,
    quantity: i64,
    expiry_date: &str,
    product: &str,
    price_type: &str,
) -> Vec<OptionLeg> {
    let leg = |offset: &str, option_type: &str, leg_action: &str| OptionLeg {
        offset: offset.to_string(),
        option_type: option_type.to_string(),
        action: leg_action.to_string(),
        quantity,
        expiry_date: expiry_date.to_string(),
        product: product.to_string(),
        price_type: price_type.to_string(),
        split_size: 0,
    };

    match strategy {
        "straddle" => vec![leg("ATM", "CE", action), leg("ATM", "PE", action)],
        "strangle" => vec![leg("OTM2", "CE", action), leg("OTM2", "PE", action)],
        "iron_condor" => {
            if action == "SELL" {
                vec![
                    leg("OTM5", "CE", "SELL"),
                    leg("OTM5", "PE", "SELL"),
                    leg("OTM10", "CE", "BUY"),
                    leg("OTM10", "PE", "BUY"),
                ]
            } else {
                vec![
                    leg("OTM5", "CE", "BUY"),
                    leg("OTM5", "PE", "BUY"),
                    leg("OTM10", "CE", "SELL"),
                    leg("OTM10", "PE", "SELL"),
                ]
            }
        }
        "iron_butterfly" => {
            if action == "SELL" {
                vec![
                    leg("ATM", "CE", "SELL"),
                    leg("ATM", "PE", "SELL"),
                    leg("OTM3", "CE", "BUY"),
                    leg("OTM3", "PE", "BUY"),
                ]
            } else {
                vec![
                    leg("ATM", "CE", "BUY"),
                    leg("ATM", "PE", "BUY"),
                    leg("OTM3", "CE", "SELL"),
                    leg("OTM3", "PE", "SELL"),
                ]
            }
        }
        "bull_call_spread" => vec![leg("ATM", "CE", "BUY"), leg("OTM3", "CE", "SELL")],
        "bear_put_spread" => vec![leg("ATM", "PE", "BUY"), leg("OTM3", "PE", "SELL")],
        "bull_put_spread" => vec![leg("ATM", "PE", "SELL"), leg("OTM3", "PE", "BUY")],
        "bear_call_spread" => vec![leg("ATM", "CE", "SELL"), leg("OTM3", "CE", "BUY")],
        _ => Vec::new(),
    }
}

impl NodeExecutor {
    /// Resolve a symbolic expiry type to a concrete API-form date.
    /// Failures are logged and yield `None`; the calling handler turns
    /// that into a local error report.
    async fn resolve_expiry_date(
        &mut self,
        symbol: &str,
        exchange: &str,
        expiry_type: &str,
    ) -> Option<String> {
        let response = self.gateway.expiry(symbol, exchange, "options").await;
        if !response.is_success() {
            self.log_error(format!("Failed to fetch expiry: {}", response.to_value()));
            return None;
        }
        let entries: Vec<String> = response
            .data
            .as_ref()
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if entries.is_empty() {
            self.log_error(format!("No expiry dates found for {symbol} on {exchange}"));
            return None;
        }

        let mut valid: Vec<(String, NaiveDate)> = Vec::with_capacity(entries.len());
        for entry in entries {
            match parse_expiry(&entry) {
                Some(date) => valid.push((entry, date)),
                None => {
                    self.log_warning(format!("Could not parse expiry date '{entry}'"));
                }
            }
        }
        if valid.is_empty() {
            self.log_error(format!("No valid expiry dates found for {symbol}"));
            return None;
        }
        valid.sort_by_key(|(_, date)| *date);

        let today = Local::now().date_naive();
        match select_expiry(&valid, expiry_type, today) {
            Some(raw) => Some(format_expiry_for_api(&raw)),
            None => {
                self.log_error(format!(
                    "No {expiry_type} expiry found for {symbol} among {} candidates",
                    valid.len()
                ));
                None
            }
        }
    }

    pub(crate) async fn options_order(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let underlying = self.context.get_str(data, "underlying", "NIFTY");
        let expiry_type = self.context.get_str(data, "expiryType", "current_week");
        let quantity = self.context.get_int(data, "quantity", 1);
        let offset = self.context.get_str(data, "offset", "ATM");
        let option_type = self.context.get_str(data, "optionType", "CE");
        let action = self.context.get_str(data, "action", "BUY");
        let price_type = self.context.get_str(data, "priceType", "MARKET");
        let product = self.context.get_str(data, "product", "NRML");
        let split_size = self.context.get_int(data, "splitSize", 0);

        self.log_info(format!(
            "Placing options order: {underlying} {option_type} {offset}"
        ));

        let (underlying_exchange, fo_exchange) = index_exchanges(&underlying);
        let total_quantity = quantity * lot_size(&underlying);

        let Some(expiry_date) = self
            .resolve_expiry_date(&underlying, fo_exchange, &expiry_type)
            .await
        else {
            return HandlerReport::error(format!("Could not resolve expiry for {expiry_type}"));
        };
        self.log_info(format!("Resolved expiry: {expiry_type} -> {expiry_date}"));

        let request = OptionsOrderRequest {
            underlying,
            exchange: underlying_exchange.to_string(),
            expiry_date,
            offset,
            option_type,
            action,
            quantity: total_quantity,
            price_type,
            product,
            split_size,
        };
        let result = self.gateway.options_order(&request).await;
        self.log_envelope("Options order result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn options_multi_order(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let underlying = self.context.get_str(data, "underlying", "NIFTY");
        let strategy = self.context.get_str(data, "strategy", "straddle");
        let action = self.context.get_str(data, "action", "SELL");
        let quantity = self.context.get_int(data, "quantity", 1);
        let expiry_type = self.context.get_str(data, "expiryType", "current_week");
        let product = self.context.get_str(data, "product", "NRML");
        let price_type = self.context.get_str(data, "priceType", "MARKET");

        self.log_info(format!(
            "Placing multi-leg options order: {underlying} strategy={strategy} action={action} product={product}"
        ));

        let (underlying_exchange, fo_exchange) = index_exchanges(&underlying);
        let total_quantity = quantity * lot_size(&underlying);

        let Some(expiry_date) = self
            .resolve_expiry_date(&underlying, fo_exchange, &expiry_type)
            .await
        else {
            return HandlerReport::error(format!("Could not resolve expiry for {expiry_type}"));
        };
        self.log_info(format!("Resolved expiry: {expiry_type} -> {expiry_date}"));

        let legs = build_strategy_legs(
            &strategy,
            &action,
            total_quantity,
            &expiry_date,
            &product,
            &price_type,
        );
        if legs.is_empty() {
            return HandlerReport::error(format!("Unknown strategy: {strategy}"));
        }
        self.log_info(format!(
            "Strategy legs: {}",
            serde_json::to_string(&legs).unwrap_or_default()
        ));

        let result = self
            .gateway
            .options_multi_order(&underlying, underlying_exchange, &legs)
            .await;
        self.log_envelope("Multi-leg order result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }
}
