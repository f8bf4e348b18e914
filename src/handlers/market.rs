//! Query handlers: read-only gateway calls whose results are typically
//! captured into variables for downstream nodes.

use chrono::Local;
use serde_json::{Map, Value, json};

use super::{HandlerReport, NodeExecutor};
use crate::gateway::types::HistoryRequest;

impl NodeExecutor {
    fn symbol_exchange(&self, data: &Map<String, Value>) -> (String, String) {
        (
            self.context.get_str(data, "symbol", ""),
            self.context.get_str(data, "exchange", "NSE"),
        )
    }

    pub(crate) async fn get_quote(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let (symbol, exchange) = self.symbol_exchange(data);
        self.log_info(format!("Getting quote for: {symbol} ({exchange})"));
        let result = self.gateway.quotes(&symbol, &exchange).await;
        self.log_envelope("Quote result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn multi_quotes(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let symbols = data.get("symbols").cloned().unwrap_or_else(|| json!([]));
        let count = symbols.as_array().map_or(0, Vec::len);
        self.log_info(format!("Getting quotes for {count} symbols"));
        let result = self.gateway.multi_quotes(&symbols).await;
        self.log_envelope("Multi quotes result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn get_depth(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let (symbol, exchange) = self.symbol_exchange(data);
        self.log_info(format!("Getting depth for: {symbol} ({exchange})"));
        let result = self.gateway.depth(&symbol, &exchange).await;
        self.log_info("Depth result received");
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn get_order_status(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let order_id = self.context.get_str(data, "orderId", "");
        self.log_info(format!("Getting order status for: {order_id}"));
        let result = self.gateway.order_status(&order_id).await;
        self.log_envelope("Order status result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn open_position(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let (symbol, exchange) = self.symbol_exchange(data);
        let product = self.context.get_str(data, "product", "MIS");
        self.log_info(format!("Getting open position for: {symbol}"));
        let result = self.gateway.open_position(&symbol, &exchange, &product).await;
        self.log_envelope("Open position result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn history(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let request = HistoryRequest {
            symbol: self.context.get_str(data, "symbol", ""),
            exchange: self.context.get_str(data, "exchange", "NSE"),
            interval: self.context.get_str(data, "interval", "5m"),
            start_date: self.context.get_str(data, "startDate", ""),
            end_date: self.context.get_str(data, "endDate", ""),
        };
        self.log_info(format!(
            "Getting history for: {} ({})",
            request.symbol, request.interval
        ));
        let result = self.gateway.history(&request).await;
        self.log_info("History data received");
        // Candle payloads can be large; the stored variable carries the
        // stringified data rather than the raw array.
        let stored = json!({
            "status": result.status,
            "data": result.data.as_ref().map(Value::to_string).unwrap_or_default(),
        });
        self.store_output(data, stored);
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn expiry(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let symbol = self.context.get_str(data, "symbol", "NIFTY");
        let exchange = self.context.get_str(data, "exchange", "NFO");
        let instrument_type = self.context.get_str(data, "instrumentType", "options");
        self.log_info(format!("Getting expiry dates for: {symbol}"));
        let result = self.gateway.expiry(&symbol, &exchange, &instrument_type).await;
        self.log_envelope("Expiry result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn symbol(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let (symbol, exchange) = self.symbol_exchange(data);
        self.log_info(format!("Getting symbol info for: {symbol} ({exchange})"));
        let result = self.gateway.symbol(&symbol, &exchange).await;
        self.log_envelope("Symbol result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn option_symbol(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let underlying = self.context.get_str(data, "underlying", "NIFTY");
        let exchange = self.context.get_str(data, "exchange", "NSE_INDEX");
        let expiry_date = self.context.get_str(data, "expiryDate", "");
        let offset = self.context.get_str(data, "offset", "ATM");
        let option_type = self.context.get_str(data, "optionType", "CE");
        self.log_info(format!(
            "Resolving option symbol: {underlying} {option_type} {offset}"
        ));
        let result = self
            .gateway
            .option_symbol(&underlying, &exchange, &expiry_date, &offset, &option_type)
            .await;
        self.log_envelope("Option symbol result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn order_book(&mut self, data: &Map<String, Value>) -> HandlerReport {
        self.log_info("Fetching order book");
        let result = self.gateway.order_book().await;
        let count = result.data.as_ref().and_then(Value::as_array).map_or(0, Vec::len);
        self.log_info(format!("Order book: {count} orders"));
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn trade_book(&mut self, data: &Map<String, Value>) -> HandlerReport {
        self.log_info("Fetching trade book");
        let result = self.gateway.trade_book().await;
        let count = result.data.as_ref().and_then(Value::as_array).map_or(0, Vec::len);
        self.log_info(format!("Trade book: {count} trades"));
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn position_book(&mut self, data: &Map<String, Value>) -> HandlerReport {
        self.log_info("Fetching position book");
        let result = self.gateway.position_book().await;
        let count = result.data.as_ref().and_then(Value::as_array).map_or(0, Vec::len);
        self.log_info(format!("Position book: {count} positions"));
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn synthetic_future(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let underlying = self.context.get_str(data, "underlying", "NIFTY");
        let exchange = self.context.get_str(data, "exchange", "NSE_INDEX");
        let expiry_date = self.context.get_str(data, "expiryDate", "");
        self.log_info(format!("Calculating synthetic future for: {underlying}"));
        let result = self
            .gateway
            .synthetic_future(&underlying, &exchange, &expiry_date)
            .await;
        self.log_envelope("Synthetic future result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn option_chain(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let underlying = self.context.get_str(data, "underlying", "NIFTY");
        let exchange = self.context.get_str(data, "exchange", "NSE_INDEX");
        let expiry_date = self.context.get_str(data, "expiryDate", "");
        let strike_count = self.context.get_int(data, "strikeCount", 10);
        self.log_info(format!(
            "Fetching option chain for: {underlying} expiry={expiry_date}"
        ));
        let result = self
            .gateway
            .option_chain(&underlying, &exchange, &expiry_date, strike_count)
            .await;
        self.log_info("Option chain result received");
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn holidays(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let year = self
            .context
            .get_str(data, "year", &Local::now().format("%Y").to_string());
        self.log_info(format!("Fetching holidays for year: {year}"));
        let result = self.gateway.holidays(&year).await;
        let count = result.data.as_ref().and_then(Value::as_array).map_or(0, Vec::len);
        self.log_info(format!("Holidays: {count} holidays"));
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn timings(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let date = self
            .context
            .get_str(data, "date", &Local::now().format("%Y-%m-%d").to_string());
        self.log_info(format!("Fetching market timings for: {date}"));
        let result = self.gateway.timings(&date).await;
        self.log_envelope("Timings result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn holdings(&mut self, data: &Map<String, Value>) -> HandlerReport {
        self.log_info("Fetching portfolio holdings");
        let result = self.gateway.holdings().await;
        let count = result
            .data_field("holdings")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        self.log_info(format!("Holdings: {count} holdings"));
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn funds(&mut self, data: &Map<String, Value>) -> HandlerReport {
        self.log_info("Fetching account funds");
        let result = self.gateway.funds().await;
        let available = result
            .data_field("availablecash")
            .cloned()
            .unwrap_or_else(|| json!("0"));
        self.log_info(format!("Available cash: {available}"));
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn margin(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let positions = data.get("positions").cloned().unwrap_or_else(|| json!([]));
        let count = positions.as_array().map_or(0, Vec::len);
        self.log_info(format!("Calculating margin for {count} positions"));
        let result = self.gateway.margin(&positions).await;
        let required = result.data_f64("total_margin_required").unwrap_or(0.0);
        self.log_info(format!("Total margin required: {required}"));
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayClient, StreamClient};
    use httpmock::prelude::*;
    use std::time::Duration;

    fn executor(base_url: &str) -> NodeExecutor {
        NodeExecutor::new(
            GatewayClient::new("k", base_url),
            StreamClient::connected_stub(Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn quote_result_lands_in_output_variable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/quotes");
                then.status(200).json_body(serde_json::json!({
                    "status": "success",
                    "data": {"ltp": 10.0},
                }));
            })
            .await;
        let mut executor = executor(&server.base_url());
        let data = serde_json::json!({"symbol": "X", "outputVariable": "var"})
            .as_object()
            .cloned()
            .unwrap();
        let report = executor.get_quote(&data).await;
        assert!(report.ok());
        // Downstream templates can reach into the envelope.
        assert_eq!(executor.context.interpolate("{{var.data.ltp}}"), "10.0");
    }

    #[tokio::test]
    async fn history_stores_stringified_data() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/history");
                then.status(200).json_body(serde_json::json!({
                    "status": "success",
                    "data": [{"close": 1.0}],
                }));
            })
            .await;
        let mut executor = executor(&server.base_url());
        let data = serde_json::json!({"symbol": "X", "outputVariable": "candles"})
            .as_object()
            .cloned()
            .unwrap();
        executor.history(&data).await;
        let stored = executor.context.variable("candles").unwrap();
        assert!(stored["data"].is_string());
    }
}
