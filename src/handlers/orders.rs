//! Order action handlers: side-effecting gateway calls.
//!
//! All text fields support `{{variable}}` interpolation. The gateway
//! response is logged, optionally stored under `outputVariable`, and
//! folded into the handler report.

use serde_json::{Map, Value, json};

use super::{HandlerReport, NodeExecutor};
use crate::gateway::types::{ModifyOrderRequest, OrderRequest, SmartOrderRequest, SplitOrderRequest};

impl NodeExecutor {
    fn order_request(&self, data: &Map<String, Value>) -> OrderRequest {
        OrderRequest {
            symbol: self.context.get_str(data, "symbol", ""),
            exchange: self.context.get_str(data, "exchange", "NSE"),
            action: self.context.get_str(data, "action", "BUY"),
            quantity: self.context.get_int(data, "quantity", 1),
            price_type: self.context.get_str(data, "priceType", "MARKET"),
            product: self.context.get_str(data, "product", "MIS"),
            price: self.context.get_float(data, "price", 0.0),
            trigger_price: self.context.get_float(data, "triggerPrice", 0.0),
        }
    }

    pub(crate) async fn place_order(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let request = self.order_request(data);
        self.log_info(format!(
            "Placing order: {} {} qty={}",
            request.symbol, request.action, request.quantity
        ));
        let result = self.gateway.place_order(&request).await;
        self.log_envelope("Order result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn smart_order(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let request = SmartOrderRequest {
            order: self.order_request(data),
            position_size: self.context.get_int(data, "positionSize", 0),
        };
        self.log_info(format!(
            "Placing smart order: {} {}",
            request.order.symbol, request.order.action
        ));
        let result = self.gateway.place_smart_order(&request).await;
        self.log_envelope("Smart order result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn basket_order(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let orders = data.get("orders").cloned().unwrap_or_else(|| json!([]));
        let count = orders.as_array().map_or(0, Vec::len);
        self.log_info(format!("Placing basket order with {count} orders"));
        let result = self.gateway.basket_order(&orders).await;
        self.log_envelope("Basket order result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn split_order(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let request = SplitOrderRequest {
            symbol: self.context.get_str(data, "symbol", ""),
            exchange: self.context.get_str(data, "exchange", "NSE"),
            action: self.context.get_str(data, "action", "BUY"),
            quantity: self.context.get_int(data, "quantity", 1),
            split_size: self.context.get_int(data, "splitSize", 10),
            price_type: self.context.get_str(data, "priceType", "MARKET"),
            product: self.context.get_str(data, "product", "MIS"),
        };
        self.log_info(format!(
            "Placing split order: {} qty={} split={}",
            request.symbol, request.quantity, request.split_size
        ));
        let result = self.gateway.split_order(&request).await;
        self.log_envelope("Split order result", &result);
        self.store_output(data, result.to_value());
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn modify_order(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let order_id = self.context.get_str(data, "orderId", "");
        self.log_info(format!("Modifying order: {order_id}"));
        let request = ModifyOrderRequest {
            order_id,
            order: OrderRequest {
                price_type: self.context.get_str(data, "priceType", "LIMIT"),
                ..self.order_request(data)
            },
        };
        let result = self.gateway.modify_order(&request).await;
        self.log_envelope("Modify order result", &result);
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn cancel_order(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let order_id = self.context.get_str(data, "orderId", "");
        self.log_info(format!("Cancelling order: {order_id}"));
        let result = self.gateway.cancel_order(&order_id).await;
        self.log_envelope("Cancel order result", &result);
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn cancel_all_orders(&mut self, _data: &Map<String, Value>) -> HandlerReport {
        self.log_info("Cancelling all orders");
        let result = self.gateway.cancel_all_orders().await;
        self.log_envelope("Cancel all result", &result);
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn close_positions(&mut self, _data: &Map<String, Value>) -> HandlerReport {
        self.log_info("Closing all positions");
        let result = self.gateway.close_positions().await;
        self.log_envelope("Close positions result", &result);
        HandlerReport::from_envelope(&result)
    }

    pub(crate) async fn telegram_alert(&mut self, data: &Map<String, Value>) -> HandlerReport {
        let username = self.context.get_str(data, "username", "");
        let message = self.context.get_str(data, "message", "");
        self.log_info(format!("Sending Telegram alert to {username}: {message}"));
        let result = self.gateway.telegram(&username, &message).await;
        self.log_envelope("Telegram result", &result);
        HandlerReport::from_envelope(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayClient, StreamClient};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn executor(base_url: &str) -> NodeExecutor {
        NodeExecutor::new(
            GatewayClient::new("key", base_url),
            StreamClient::connected_stub(Duration::from_millis(10)),
        )
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn place_order_interpolates_and_stores_output() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/placeorder")
                    .json_body_includes(r#"{"symbol": "RELIANCE", "quantity": 5}"#);
                then.status(200)
                    .json_body(json!({"status": "success", "orderid": "42"}));
            })
            .await;

        let mut executor = executor(&server.base_url());
        executor.context.set_variable("qty", json!("5"));
        let node = data(json!({
            "symbol": "RELIANCE",
            "quantity": "{{qty}}",
            "outputVariable": "order",
        }));
        let report = executor.place_order(&node).await;
        mock.assert_async().await;
        assert!(report.ok());
        let stored = executor.context.variable("order").unwrap();
        assert_eq!(stored["orderid"], "42");
    }

    #[tokio::test]
    async fn order_defaults_match_contract() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/placeorder").json_body_includes(
                    r#"{"exchange": "NSE", "action": "BUY", "quantity": 1,
                        "pricetype": "MARKET", "product": "MIS"}"#,
                );
                then.status(200).json_body(json!({"status": "success"}));
            })
            .await;
        let mut executor = executor(&server.base_url());
        let report = executor.place_order(&data(json!({"symbol": "X"}))).await;
        mock.assert_async().await;
        assert!(report.ok());
    }

    #[tokio::test]
    async fn gateway_error_is_logged_not_thrown() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/cancelorder");
                then.status(200)
                    .json_body(json!({"status": "error", "message": "no such order"}));
            })
            .await;
        let mut executor = executor(&server.base_url());
        let report = executor
            .cancel_order(&data(json!({"orderId": "404"})))
            .await;
        assert!(!report.ok());
        assert!(executor
            .logs
            .iter()
            .any(|entry| entry.message.contains("no such order")));
    }
}
