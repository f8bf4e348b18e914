//! Conditional handlers: compute a boolean that steers edge selection.
//!
//! Numeric comparisons use the `gt/gte/lt/lte/eq/neq` operator set; time
//! comparisons use `== >= <= > <` in seconds-since-midnight space.

use chrono::Local;
use serde_json::{Map, Value, json};

use super::{HandlerReport, NodeExecutor};
use crate::gateway::value_as_f64;
use crate::utils::clock::{parse_naive_time, seconds_since_midnight};

/// Evaluate `value <op> threshold` for the fixed operator set. Unknown
/// operators are false.
pub(crate) fn evaluate_condition(value: f64, operator: &str, threshold: f64) -> bool {
    match operator {
        "gt" => value > threshold,
        "gte" => value >= threshold,
        "lt" => value < threshold,
        "lte" => value <= threshold,
        "eq" => value == threshold,
        "neq" => value != threshold,
        _ => false,
    }
}

impl NodeExecutor {
    pub(crate) async fn position_check(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let symbol = self.context.get_str(data, "symbol", "");
        let exchange = self.context.get_str(data, "exchange", "NSE");
        let product = self.context.get_str(data, "product", "MIS");
        let operator = self.context.get_str(data, "operator", "gt");
        let threshold = self.context.get_int(data, "threshold", 0) as f64;

        self.log_info(format!("Checking position for: {symbol}"));
        let result = self.gateway.open_position(&symbol, &exchange, &product).await;

        let quantity = result
            .field("quantity")
            .and_then(value_as_f64)
            .unwrap_or(0.0);
        let condition = evaluate_condition(quantity, &operator, threshold);
        self.log_info(format!(
            "Position check: qty={quantity} {operator} {threshold} = {condition}"
        ));
        HandlerReport::success()
            .with_condition(condition)
            .with_field("quantity", json!(quantity))
    }

    pub(crate) async fn fund_check(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let operator = self.context.get_str(data, "operator", "gt");
        let threshold = self.context.get_float(data, "threshold", 0.0);

        self.log_info("Checking funds");
        let result = self.gateway.funds().await;

        let available = result.data_f64("availablecash").unwrap_or(0.0);
        let condition = evaluate_condition(available, &operator, threshold);
        self.log_info(format!(
            "Fund check: available={available} {operator} {threshold} = {condition}"
        ));
        HandlerReport::success()
            .with_condition(condition)
            .with_field("available", json!(available))
    }

    pub(crate) async fn price_condition(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let symbol = self.context.get_str(data, "symbol", "");
        let exchange = self.context.get_str(data, "exchange", "NSE");
        let operator = self.context.get_str(data, "operator", "gt");
        let threshold = self.context.get_float(data, "threshold", 0.0);

        self.log_info(format!("Checking price condition for: {symbol}"));
        let result = self.gateway.quotes(&symbol, &exchange).await;

        let ltp = result.data_f64("ltp").unwrap_or(0.0);
        let condition = evaluate_condition(ltp, &operator, threshold);
        self.log_info(format!(
            "Price check: ltp={ltp} {operator} {threshold} = {condition}"
        ));
        HandlerReport::success()
            .with_condition(condition)
            .with_field("ltp", json!(ltp))
    }

    /// Price alert trigger: a conditional with a richer condition
    /// vocabulary (thresholds, channels, crossings, percentage moves
    /// against previous close).
    pub(crate) async fn price_alert(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let symbol = self.context.get_str(data, "symbol", "");
        let exchange = self.context.get_str(data, "exchange", "NSE");
        let condition_type = self.context.get_str(data, "condition", "greater_than");
        let price = self.context.get_float(data, "price", 0.0);
        let price_lower = self.context.get_float(data, "priceLower", 0.0);
        let price_upper = self.context.get_float(data, "priceUpper", 0.0);
        let percentage = self.context.get_float(data, "percentage", 0.0);

        if symbol.is_empty() {
            self.log_error("Price alert: No symbol specified");
            return HandlerReport::error("No symbol specified").with_condition(false);
        }

        self.log_info(format!("Price alert: Fetching quote for {symbol} ({exchange})"));
        let result = self.gateway.quotes(&symbol, &exchange).await;
        if !result.is_success() {
            self.log_error(format!(
                "Price alert: Failed to fetch quote - {}",
                result.to_value()
            ));
            return HandlerReport::error("Failed to fetch quote").with_condition(false);
        }

        let ltp = result.data_f64("ltp").unwrap_or(0.0);
        let prev_close = result.data_f64("prev_close").unwrap_or(ltp);

        let condition = match condition_type.as_str() {
            "greater_than" | "crossing_up" => ltp > price,
            "less_than" | "crossing_down" => ltp < price,
            // At or very close to the target: within 0.1%.
            "crossing" => (ltp - price).abs() <= price * 0.001,
            "entering_channel" | "inside_channel" => price_lower <= ltp && ltp <= price_upper,
            "exiting_channel" | "outside_channel" => ltp < price_lower || ltp > price_upper,
            "moving_up" => ltp > prev_close,
            "moving_down" => ltp < prev_close,
            "moving_up_percent" => {
                prev_close > 0.0 && ((ltp - prev_close) / prev_close) * 100.0 >= percentage
            }
            "moving_down_percent" => {
                prev_close > 0.0 && ((prev_close - ltp) / prev_close) * 100.0 >= percentage
            }
            other => {
                self.log_warning(format!("Price alert: Unknown condition type '{other}'"));
                false
            }
        };
        self.log_info(format!(
            "Price alert: {symbol} LTP={ltp} {condition_type} = {condition}"
        ));

        self.store_output(
            data,
            json!({
                "status": "success",
                "ltp": ltp,
                "prev_close": prev_close,
                "condition_met": condition,
                "symbol": symbol,
                "exchange": exchange,
            }),
        );

        HandlerReport::success()
            .with_condition(condition)
            .with_field("ltp", json!(ltp))
            .with_field("prev_close", json!(prev_close))
    }

    /// True while the current clock falls inside `[startTime, endTime]`.
    pub(crate) fn time_window(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let start_str = self.context.get_str(data, "startTime", "09:15");
        let end_str = self.context.get_str(data, "endTime", "15:30");

        let now = Local::now().time();
        let start = parse_naive_time(&start_str, 9, 15);
        let end = parse_naive_time(&end_str, 15, 30);
        let condition = start <= now && now <= end;

        self.log_info(format!(
            "Time window check: {start_str}-{end_str}, current={}, in_window={condition}",
            now.format("%H:%M")
        ));
        HandlerReport::success()
            .with_condition(condition)
            .with_field("current_time", json!(now.format("%H:%M:%S").to_string()))
    }

    /// Compare the current clock against a target time with `== >= <= > <`.
    /// Equality matches to the minute.
    pub(crate) fn time_condition(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let target_str = self.context.get_str(data, "targetTime", "09:30");
        let operator = self.context.get_str(data, "operator", ">=");
        let condition_type = self.context.get_str(data, "conditionType", "entry");

        let now = Local::now().time();
        let target = parse_naive_time(&target_str, 9, 30);
        let now_seconds = seconds_since_midnight(now);
        let target_seconds = seconds_since_midnight(target);

        let condition = match operator.as_str() {
            "==" => {
                use chrono::Timelike;
                now.hour() == target.hour() && now.minute() == target.minute()
            }
            ">=" => now_seconds >= target_seconds,
            "<=" => now_seconds <= target_seconds,
            ">" => now_seconds > target_seconds,
            "<" => now_seconds < target_seconds,
            _ => false,
        };

        self.log_info(format!(
            "Time condition ({condition_type}): current={} {operator} target={target_str} = {condition}",
            now.format("%H:%M:%S")
        ));
        HandlerReport::success()
            .with_condition(condition)
            .with_field("condition_type", json!(condition_type))
            .with_field("current_time", json!(now.format("%H:%M:%S").to_string()))
            .with_field("target_time", json!(target_str))
            .with_field("operator", json!(operator))
    }
}
