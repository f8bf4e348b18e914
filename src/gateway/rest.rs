//! One method per gateway REST operation.
//!
//! Order-side calls carry the [`STRATEGY_TAG`](super::STRATEGY_TAG) so the
//! gateway can attribute fills; read-side calls are plain lookups. All
//! methods return an [`Envelope`](super::Envelope) and never fail at the
//! type level.

use serde_json::{Value, json};

use super::types::{
    HistoryRequest, ModifyOrderRequest, OptionLeg, OptionsOrderRequest, OrderRequest,
    SmartOrderRequest, SplitOrderRequest,
};
use super::{Envelope, GatewayClient, STRATEGY_TAG};

impl GatewayClient {
    fn tagged(body: Value) -> Value {
        let mut body = body;
        if let Value::Object(map) = &mut body {
            map.insert("strategy".to_string(), Value::String(STRATEGY_TAG.into()));
        }
        body
    }

    // ----- Orders -----

    pub async fn place_order(&self, request: &OrderRequest) -> Envelope {
        let body = Self::tagged(serde_json::to_value(request).unwrap_or_default());
        self.post("placeorder", body).await
    }

    pub async fn place_smart_order(&self, request: &SmartOrderRequest) -> Envelope {
        let body = Self::tagged(serde_json::to_value(request).unwrap_or_default());
        self.post("placesmartorder", body).await
    }

    pub async fn options_order(&self, request: &OptionsOrderRequest) -> Envelope {
        let body = Self::tagged(serde_json::to_value(request).unwrap_or_default());
        self.post("optionsorder", body).await
    }

    pub async fn options_multi_order(
        &self,
        underlying: &str,
        exchange: &str,
        legs: &[OptionLeg],
    ) -> Envelope {
        let body = Self::tagged(json!({
            "underlying": underlying,
            "exchange": exchange,
            "legs": legs,
        }));
        self.post("optionsmultiorder", body).await
    }

    /// Basket of pre-resolved orders; entries pass through untouched.
    pub async fn basket_order(&self, orders: &Value) -> Envelope {
        self.post("basketorder", json!({ "orders": orders })).await
    }

    pub async fn split_order(&self, request: &SplitOrderRequest) -> Envelope {
        let body = Self::tagged(serde_json::to_value(request).unwrap_or_default());
        self.post("splitorder", body).await
    }

    pub async fn modify_order(&self, request: &ModifyOrderRequest) -> Envelope {
        let body = Self::tagged(serde_json::to_value(request).unwrap_or_default());
        self.post("modifyorder", body).await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Envelope {
        let body = Self::tagged(json!({ "orderid": order_id }));
        self.post("cancelorder", body).await
    }

    pub async fn cancel_all_orders(&self) -> Envelope {
        self.post("cancelallorder", Self::tagged(json!({}))).await
    }

    pub async fn close_positions(&self) -> Envelope {
        self.post("closeposition", Self::tagged(json!({}))).await
    }

    pub async fn order_status(&self, order_id: &str) -> Envelope {
        let body = Self::tagged(json!({ "orderid": order_id }));
        self.post("orderstatus", body).await
    }

    // ----- Market data -----

    pub async fn quotes(&self, symbol: &str, exchange: &str) -> Envelope {
        self.post("quotes", json!({ "symbol": symbol, "exchange": exchange }))
            .await
    }

    /// `symbols` is a list of `{symbol, exchange}` objects.
    pub async fn multi_quotes(&self, symbols: &Value) -> Envelope {
        self.post("multiquotes", json!({ "symbols": symbols })).await
    }

    pub async fn depth(&self, symbol: &str, exchange: &str) -> Envelope {
        self.post("depth", json!({ "symbol": symbol, "exchange": exchange }))
            .await
    }

    pub async fn history(&self, request: &HistoryRequest) -> Envelope {
        self.post(
            "history",
            serde_json::to_value(request).unwrap_or_default(),
        )
        .await
    }

    pub async fn expiry(&self, symbol: &str, exchange: &str, instrument_type: &str) -> Envelope {
        self.post(
            "expiry",
            json!({
                "symbol": symbol,
                "exchange": exchange,
                "instrumenttype": instrument_type,
            }),
        )
        .await
    }

    /// Symbol metadata: lot size, tick size, token.
    pub async fn symbol(&self, symbol: &str, exchange: &str) -> Envelope {
        self.post("symbol", json!({ "symbol": symbol, "exchange": exchange }))
            .await
    }

    pub async fn option_symbol(
        &self,
        underlying: &str,
        exchange: &str,
        expiry_date: &str,
        offset: &str,
        option_type: &str,
    ) -> Envelope {
        self.post(
            "optionsymbol",
            json!({
                "underlying": underlying,
                "exchange": exchange,
                "expiry_date": expiry_date,
                "offset": offset,
                "option_type": option_type,
            }),
        )
        .await
    }

    pub async fn option_chain(
        &self,
        underlying: &str,
        exchange: &str,
        expiry_date: &str,
        strike_count: i64,
    ) -> Envelope {
        self.post(
            "optionchain",
            json!({
                "underlying": underlying,
                "exchange": exchange,
                "expiry_date": expiry_date,
                "strike_count": strike_count,
            }),
        )
        .await
    }

    pub async fn synthetic_future(
        &self,
        underlying: &str,
        exchange: &str,
        expiry_date: &str,
    ) -> Envelope {
        self.post(
            "syntheticfuture",
            json!({
                "underlying": underlying,
                "exchange": exchange,
                "expiry_date": expiry_date,
            }),
        )
        .await
    }

    pub async fn search(&self, query: &str, exchange: &str) -> Envelope {
        self.post("search", json!({ "query": query, "exchange": exchange }))
            .await
    }

    // ----- Account -----

    pub async fn funds(&self) -> Envelope {
        self.post("funds", json!({})).await
    }

    pub async fn holdings(&self) -> Envelope {
        self.post("holdings", json!({})).await
    }

    pub async fn position_book(&self) -> Envelope {
        self.post("positionbook", json!({})).await
    }

    pub async fn order_book(&self) -> Envelope {
        self.post("orderbook", json!({})).await
    }

    pub async fn trade_book(&self) -> Envelope {
        self.post("tradebook", json!({})).await
    }

    pub async fn open_position(&self, symbol: &str, exchange: &str, product: &str) -> Envelope {
        let body = Self::tagged(json!({
            "symbol": symbol,
            "exchange": exchange,
            "product": product,
        }));
        self.post("openposition", body).await
    }

    /// Margin estimate for a list of prospective positions.
    pub async fn margin(&self, positions: &Value) -> Envelope {
        self.post("margin", json!({ "positions": positions })).await
    }

    pub async fn holidays(&self, year: &str) -> Envelope {
        self.post("holidays", json!({ "year": year })).await
    }

    pub async fn timings(&self, date: &str) -> Envelope {
        self.post("timings", json!({ "date": date })).await
    }

    // ----- Notification -----

    pub async fn telegram(&self, username: &str, message: &str) -> Envelope {
        self.post(
            "telegram",
            json!({ "username": username, "message": message }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::OrderRequest;
    use httpmock::prelude::*;

    fn order() -> OrderRequest {
        OrderRequest {
            symbol: "RELIANCE".into(),
            exchange: "NSE".into(),
            action: "BUY".into(),
            quantity: 1,
            price_type: "MARKET".into(),
            product: "MIS".into(),
            price: 0.0,
            trigger_price: 0.0,
        }
    }

    #[tokio::test]
    async fn place_order_posts_tagged_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/placeorder")
                    .json_body_includes(
                        r#"{"symbol": "RELIANCE", "action": "BUY", "quantity": 1,
                            "pricetype": "MARKET", "product": "MIS",
                            "strategy": "TradeWeave", "apikey": "k"}"#,
                    );
                then.status(200)
                    .json_body(serde_json::json!({"status": "success", "orderid": "1234"}));
            })
            .await;

        let client = GatewayClient::new("k", server.base_url());
        let envelope = client.place_order(&order()).await;
        mock.assert_async().await;
        assert!(envelope.is_success());
        assert_eq!(envelope.field("orderid").unwrap(), "1234");
    }

    #[tokio::test]
    async fn quotes_returns_data_object() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/quotes");
                then.status(200).json_body(serde_json::json!({
                    "status": "success",
                    "data": {"ltp": 2950.5, "prev_close": 2900.0},
                }));
            })
            .await;

        let client = GatewayClient::new("k", server.base_url());
        let envelope = client.quotes("RELIANCE", "NSE").await;
        assert_eq!(envelope.data_f64("ltp"), Some(2950.5));
    }

    #[tokio::test]
    async fn gateway_error_envelope_passes_through() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/cancelorder");
                then.status(200).json_body(
                    serde_json::json!({"status": "error", "message": "order not found"}),
                );
            })
            .await;

        let client = GatewayClient::new("k", server.base_url());
        let envelope = client.cancel_order("404").await;
        assert!(!envelope.is_success());
        assert_eq!(envelope.message.as_deref(), Some("order not found"));
    }
}
