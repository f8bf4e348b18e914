//! Request payload types for gateway operations.
//!
//! Field names mirror the gateway's wire vocabulary (`pricetype`,
//! `splitsize`, …) so the serialized body is the API payload.

use serde::{Deserialize, Serialize};

/// Parameters for a plain order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub action: String,
    pub quantity: i64,
    #[serde(rename = "pricetype")]
    pub price_type: String,
    pub product: String,
    pub price: f64,
    pub trigger_price: f64,
}

/// A smart order targets a position size in addition to the order fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmartOrderRequest {
    #[serde(flatten)]
    pub order: OrderRequest,
    pub position_size: i64,
}

/// Single-leg options order by symbolic offset and resolved expiry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptionsOrderRequest {
    pub underlying: String,
    pub exchange: String,
    pub expiry_date: String,
    pub offset: String,
    pub option_type: String,
    pub action: String,
    pub quantity: i64,
    #[serde(rename = "pricetype")]
    pub price_type: String,
    pub product: String,
    #[serde(rename = "splitsize")]
    pub split_size: i64,
}

/// One component of a multi-leg options order. Product, price type, and
/// expiry are carried per leg.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    pub offset: String,
    pub option_type: String,
    pub action: String,
    pub quantity: i64,
    pub expiry_date: String,
    pub product: String,
    #[serde(rename = "pricetype")]
    pub price_type: String,
    #[serde(rename = "splitsize")]
    pub split_size: i64,
}

/// Split a large order into child orders of at most `split_size`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitOrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub action: String,
    pub quantity: i64,
    #[serde(rename = "splitsize")]
    pub split_size: i64,
    #[serde(rename = "pricetype")]
    pub price_type: String,
    pub product: String,
}

/// Modify an open order in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModifyOrderRequest {
    #[serde(rename = "orderid")]
    pub order_id: String,
    #[serde(flatten)]
    pub order: OrderRequest,
}

/// Historical candle query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub symbol: String,
    pub exchange: String,
    pub interval: String,
    pub start_date: String,
    pub end_date: String,
}
