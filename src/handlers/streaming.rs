//! Streaming handlers: subscribe-with-fallback and unsubscribe.
//!
//! The engine's traversal is synchronous between nodes, so a subscribe
//! node delivers exactly one value: it opens the streaming channel if
//! needed, waits a bounded time for the first matching message, and on
//! timeout degrades to the corresponding REST query tagged
//! `fallback: true`. The subscription itself stays registered so later
//! subscribes on the same instrument resolve instantly.

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::timeout;

use super::{HandlerReport, NodeExecutor};
use crate::gateway::{StreamMode, value_as_f64};

impl NodeExecutor {
    /// Ensure the socket is open, subscribe, and wait for the first
    /// message for this instrument. `Ok(None)` means the wait timed out
    /// and the caller should fall back to REST.
    async fn first_stream_value(
        &mut self,
        mode: StreamMode,
        symbol: &str,
        exchange: &str,
    ) -> Result<Option<Value>, String> {
        if !self.stream.is_connected() {
            self.log_info("Connecting to streaming server...");
            self.stream
                .connect()
                .await
                .map_err(|err| format!("Failed to connect to streaming server: {err}"))?;
        }

        let (tx, rx) = oneshot::channel::<Value>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let callback = {
            let slot = Arc::clone(&slot);
            Arc::new(move |payload: &Value| {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(payload.clone());
                }
            })
        };
        self.stream
            .subscribe(mode, exchange, symbol, callback)
            .map_err(|err| err.to_string())?;

        match timeout(self.stream.first_message_timeout(), rx).await {
            Ok(Ok(value)) => Ok(Some(value)),
            // Timeout, or the sender vanished with the registry.
            _ => Ok(None),
        }
    }

    pub(crate) async fn subscribe_ltp(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let symbol = self.context.get_str(data, "symbol", "");
        let exchange = self.context.get_str(data, "exchange", "NSE");
        let output_var = data
            .get("outputVariable")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("ltp")
            .to_string();
        self.log_info(format!("Subscribing to LTP stream: {symbol} ({exchange})"));

        let streamed = match self.first_stream_value(StreamMode::Ltp, &symbol, &exchange).await {
            Ok(streamed) => streamed,
            Err(err) => {
                self.log_error(format!("Failed to get LTP: {err}"));
                return HandlerReport::error(err)
                    .with_field("type", json!("ltp"))
                    .with_field("symbol", json!(symbol));
            }
        };

        let (ltp, payload, fallback) = match streamed {
            Some(payload) => {
                let ltp = payload.get("ltp").and_then(value_as_f64).unwrap_or(0.0);
                self.log_info(format!("LTP for {symbol}: {ltp} (via stream)"));
                (ltp, payload, false)
            }
            None => {
                self.log_warning("Stream timeout, using API fallback");
                let quote = self.gateway.quotes(&symbol, &exchange).await;
                let ltp = quote.data_f64("ltp").unwrap_or(0.0);
                let payload = quote.data.clone().unwrap_or_else(|| json!({}));
                self.log_info(format!("LTP for {symbol}: {ltp} (via API fallback)"));
                (ltp, payload, true)
            }
        };

        self.context.set_variable(output_var, json!(ltp));
        let mut report = HandlerReport::success()
            .with_field("type", json!("ltp"))
            .with_field("symbol", json!(symbol))
            .with_field("exchange", json!(exchange))
            .with_field("ltp", json!(ltp))
            .with_field("data", payload.clone());
        if fallback {
            report = report.with_field("fallback", json!(true));
        }
        let mut stored = report.fields.clone();
        stored.insert("status".to_string(), json!("success"));
        self.store_output(data, Value::Object(stored));
        report
    }

    pub(crate) async fn subscribe_quote(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let symbol = self.context.get_str(data, "symbol", "");
        let exchange = self.context.get_str(data, "exchange", "NSE");
        let output_var = data
            .get("outputVariable")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("quote")
            .to_string();
        self.log_info(format!("Subscribing to Quote stream: {symbol} ({exchange})"));

        let streamed = match self
            .first_stream_value(StreamMode::Quote, &symbol, &exchange)
            .await
        {
            Ok(streamed) => streamed,
            Err(err) => {
                self.log_error(format!("Failed to get Quote: {err}"));
                return HandlerReport::error(err)
                    .with_field("type", json!("quote"))
                    .with_field("symbol", json!(symbol));
            }
        };

        let (payload, fallback) = match streamed {
            Some(payload) => {
                self.log_info(format!(
                    "Quote for {symbol}: LTP={} (via stream)",
                    payload.get("ltp").and_then(value_as_f64).unwrap_or(0.0)
                ));
                (payload, false)
            }
            None => {
                self.log_warning("Stream timeout, using API fallback");
                let quote = self.gateway.quotes(&symbol, &exchange).await;
                let payload = quote.data.clone().unwrap_or_else(|| json!({}));
                self.log_info(format!(
                    "Quote for {symbol}: LTP={} (via API fallback)",
                    quote.data_f64("ltp").unwrap_or(0.0)
                ));
                (payload, true)
            }
        };

        self.context.set_variable(output_var, payload.clone());
        let mut report = HandlerReport::success()
            .with_field("type", json!("quote"))
            .with_field("symbol", json!(symbol))
            .with_field("exchange", json!(exchange));
        for key in ["ltp", "open", "high", "low", "volume", "bid", "ask", "prev_close"] {
            let value = payload.get(key).cloned().unwrap_or_else(|| json!(0));
            report = report.with_field(key, value);
        }
        report = report.with_field("data", payload);
        if fallback {
            report = report.with_field("fallback", json!(true));
        }
        let mut stored = report.fields.clone();
        stored.insert("status".to_string(), json!("success"));
        self.store_output(data, Value::Object(stored));
        report
    }

    pub(crate) async fn subscribe_depth(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let symbol = self.context.get_str(data, "symbol", "");
        let exchange = self.context.get_str(data, "exchange", "NSE");
        let output_var = data
            .get("outputVariable")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("depth")
            .to_string();
        self.log_info(format!("Subscribing to Depth stream: {symbol} ({exchange})"));

        let streamed = match self
            .first_stream_value(StreamMode::Depth, &symbol, &exchange)
            .await
        {
            Ok(streamed) => streamed,
            Err(err) => {
                self.log_error(format!("Failed to get Depth: {err}"));
                return HandlerReport::error(err)
                    .with_field("type", json!("depth"))
                    .with_field("symbol", json!(symbol));
            }
        };

        let (payload, fallback) = match streamed {
            Some(payload) => {
                let bids = payload.get("bids").and_then(Value::as_array).map_or(0, Vec::len);
                let asks = payload.get("asks").and_then(Value::as_array).map_or(0, Vec::len);
                self.log_info(format!(
                    "Depth for {symbol}: {bids} bids, {asks} asks (via stream)"
                ));
                (payload, false)
            }
            None => {
                self.log_warning("Stream timeout, using API fallback");
                let depth = self.gateway.depth(&symbol, &exchange).await;
                let payload = depth.data.clone().unwrap_or_else(|| json!({}));
                let bids = payload.get("bids").and_then(Value::as_array).map_or(0, Vec::len);
                self.log_info(format!("Depth for {symbol}: {bids} bids (via API fallback)"));
                (payload, true)
            }
        };

        self.context.set_variable(output_var, payload.clone());
        let mut report = HandlerReport::success()
            .with_field("type", json!("depth"))
            .with_field("symbol", json!(symbol))
            .with_field("exchange", json!(exchange))
            .with_field("bids", payload.get("bids").cloned().unwrap_or_else(|| json!([])))
            .with_field("asks", payload.get("asks").cloned().unwrap_or_else(|| json!([])))
            .with_field(
                "totalbuyqty",
                payload.get("totalbuyqty").cloned().unwrap_or_else(|| json!(0)),
            )
            .with_field(
                "totalsellqty",
                payload.get("totalsellqty").cloned().unwrap_or_else(|| json!(0)),
            )
            .with_field("ltp", payload.get("ltp").cloned().unwrap_or_else(|| json!(0)))
            .with_field("data", payload);
        if fallback {
            report = report.with_field("fallback", json!(true));
        }
        let mut stored = report.fields.clone();
        stored.insert("status".to_string(), json!("success"));
        self.store_output(data, Value::Object(stored));
        report
    }

    /// Remove subscriptions for one or all stream types. `all` with no
    /// symbol tears the socket down entirely.
    pub(crate) fn unsubscribe(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let symbol = self.context.get_str(data, "symbol", "");
        let exchange = self.context.get_str(data, "exchange", "NSE");
        let stream_type = self.context.get_str(data, "streamType", "all");
        let target = if symbol.is_empty() {
            "all".to_string()
        } else {
            symbol.clone()
        };
        self.log_info(format!(
            "Unsubscribing from {stream_type} stream: {target} ({exchange})"
        ));

        if !self.stream.is_connected() {
            self.log_info("Streaming channel not connected, nothing to unsubscribe");
            return HandlerReport::success()
                .with_field("state", json!("not_connected"))
                .with_field("type", json!(stream_type))
                .with_field("symbol", json!(target))
                .with_field("exchange", json!(exchange));
        }

        if !symbol.is_empty() {
            for mode in [StreamMode::Ltp, StreamMode::Quote, StreamMode::Depth] {
                if stream_type == "all" || stream_type == mode.as_str() {
                    if let Err(err) = self.stream.unsubscribe(mode, &exchange, &symbol) {
                        self.log_error(format!("Unsubscribe error: {err}"));
                        return HandlerReport::error(err.to_string())
                            .with_field("type", json!(stream_type))
                            .with_field("symbol", json!(symbol));
                    }
                    self.log_info(format!("Unsubscribed from {mode}: {symbol}"));
                }
            }
        }

        if stream_type == "all" && symbol.is_empty() {
            self.stream.disconnect();
            self.log_info("Disconnected from streaming server");
        }

        HandlerReport::success()
            .with_field("state", json!("unsubscribed"))
            .with_field("type", json!(stream_type))
            .with_field("symbol", json!(target))
            .with_field("exchange", json!(exchange))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayClient, StreamClient};
    use httpmock::prelude::*;
    use std::time::Duration;

    fn node(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn first_message_wins_over_fallback() {
        let stream = StreamClient::connected_stub(Duration::from_secs(1));
        let mut executor = NodeExecutor::new(GatewayClient::new("k", "http://127.0.0.1:1"), stream.clone());

        let inject = tokio::spawn({
            let stream = stream.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                stream.inject(&json!({
                    "mode": "ltp", "exchange": "NSE", "symbol": "RELIANCE",
                    "data": {"ltp": 2951.0, "symbol": "RELIANCE", "exchange": "NSE"},
                }));
            }
        });

        let report = executor
            .subscribe_ltp(&node(json!({"symbol": "RELIANCE"})))
            .await;
        inject.await.unwrap();
        assert!(report.ok());
        assert_eq!(report.fields.get("ltp"), Some(&json!(2951.0)));
        assert!(report.fields.get("fallback").is_none());
        assert_eq!(executor.context.variable("ltp"), Some(&json!(2951.0)));
    }

    #[tokio::test]
    async fn timeout_falls_back_to_rest() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/quotes");
                then.status(200).json_body(json!({
                    "status": "success",
                    "data": {"ltp": 123.0},
                }));
            })
            .await;

        let stream = StreamClient::connected_stub(Duration::from_millis(30));
        let mut executor =
            NodeExecutor::new(GatewayClient::new("k", server.base_url()), stream);
        let report = executor
            .subscribe_ltp(&node(json!({"symbol": "X", "outputVariable": "px"})))
            .await;
        assert!(report.ok());
        assert_eq!(report.fields.get("fallback"), Some(&json!(true)));
        assert_eq!(report.fields.get("ltp"), Some(&json!(123.0)));
        assert_eq!(executor.context.variable("px"), Some(&json!(123.0)));
    }

    #[tokio::test]
    async fn quote_fallback_carries_ohlc_fields() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/quotes");
                then.status(200).json_body(json!({
                    "status": "success",
                    "data": {"ltp": 10.0, "open": 9.0, "high": 11.0, "low": 8.5,
                             "volume": 1000, "prev_close": 9.5},
                }));
            })
            .await;
        let stream = StreamClient::connected_stub(Duration::from_millis(30));
        let mut executor =
            NodeExecutor::new(GatewayClient::new("k", server.base_url()), stream);
        let report = executor.subscribe_quote(&node(json!({"symbol": "X"}))).await;
        assert_eq!(report.fields.get("open"), Some(&json!(9.0)));
        assert_eq!(report.fields.get("prev_close"), Some(&json!(9.5)));
        // Missing fields default to zero.
        assert_eq!(report.fields.get("bid"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn unsubscribe_when_disconnected_reports_state() {
        let stream = StreamClient::new("ws://nowhere", "k");
        let mut executor = NodeExecutor::new(GatewayClient::new("k", "http://127.0.0.1:1"), stream);
        let report = executor.unsubscribe(&node(json!({})));
        assert!(report.ok());
        assert_eq!(report.fields.get("state"), Some(&json!("not_connected")));
    }

    #[tokio::test]
    async fn unsubscribe_all_without_symbol_disconnects() {
        let stream = StreamClient::connected_stub(Duration::from_millis(10));
        let mut executor =
            NodeExecutor::new(GatewayClient::new("k", "http://127.0.0.1:1"), stream.clone());
        let report = executor.unsubscribe(&node(json!({"streamType": "all"})));
        assert!(report.ok());
        assert_eq!(report.fields.get("state"), Some(&json!("unsubscribed")));
        assert!(!stream.is_connected());
    }
}
