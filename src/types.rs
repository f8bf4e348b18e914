//! Core types for the TradeWeave workflow engine.
//!
//! This module defines the discriminator tags that identify workflow nodes.
//! A [`NodeKind`] selects which handler runs for a node; the set of kinds is
//! closed except for [`NodeKind::Unknown`], which preserves forward
//! compatibility with graph editors that ship new node types before the
//! engine learns about them.
//!
//! # Examples
//!
//! ```rust
//! use tradeweave::types::NodeKind;
//!
//! let kind = NodeKind::decode("placeOrder");
//! assert_eq!(kind, NodeKind::PlaceOrder);
//! assert_eq!(kind.encode(), "placeOrder");
//!
//! // Unknown tags round-trip unchanged.
//! let other = NodeKind::decode("shinyNewNode");
//! assert_eq!(other.encode(), "shinyNewNode");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the type of a node within a workflow graph.
///
/// The string forms match the graph editor's `type` field verbatim
/// (camelCase). [`encode`](Self::encode)/[`decode`](Self::decode) provide
/// the persisted representation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    /// Entry point; exactly one per workflow. Carries the schedule
    /// configuration in its data bag.
    Start,
    /// Visual container node; pure pass-through during traversal.
    Group,

    // Action nodes: side-effecting gateway calls.
    PlaceOrder,
    SmartOrder,
    OptionsOrder,
    OptionsMultiOrder,
    BasketOrder,
    SplitOrder,
    ModifyOrder,
    CancelOrder,
    CancelAllOrders,
    ClosePositions,
    TelegramAlert,
    HttpRequest,
    Log,

    // Query nodes: read-only gateway calls.
    GetQuote,
    MultiQuotes,
    GetDepth,
    GetOrderStatus,
    OpenPosition,
    History,
    Expiry,
    Symbol,
    OptionSymbol,
    OrderBook,
    TradeBook,
    PositionBook,
    SyntheticFuture,
    OptionChain,
    Holidays,
    Timings,
    Holdings,
    Funds,
    Margin,

    // Streaming nodes.
    SubscribeLtp,
    SubscribeQuote,
    SubscribeDepth,
    Unsubscribe,

    // Control nodes.
    Delay,
    WaitUntil,
    Variable,
    MathExpression,

    // Conditional nodes: produce a boolean condition result.
    PositionCheck,
    FundCheck,
    PriceCondition,
    PriceAlert,
    TimeWindow,
    TimeCondition,

    // Logic gates over upstream condition results.
    AndGate,
    OrGate,
    NotGate,

    /// Any tag the engine does not recognize. Logged as a warning and
    /// passed through during traversal.
    Unknown(String),
}

impl NodeKind {
    /// Decode the graph editor's `type` string into a `NodeKind`.
    ///
    /// Unrecognized tags become [`NodeKind::Unknown`] rather than failing,
    /// so stored graphs stay loadable across editor versions.
    pub fn decode(s: &str) -> Self {
        match s {
            "start" => NodeKind::Start,
            "group" => NodeKind::Group,
            "placeOrder" => NodeKind::PlaceOrder,
            "smartOrder" => NodeKind::SmartOrder,
            "optionsOrder" => NodeKind::OptionsOrder,
            "optionsMultiOrder" => NodeKind::OptionsMultiOrder,
            "basketOrder" => NodeKind::BasketOrder,
            "splitOrder" => NodeKind::SplitOrder,
            "modifyOrder" => NodeKind::ModifyOrder,
            "cancelOrder" => NodeKind::CancelOrder,
            "cancelAllOrders" => NodeKind::CancelAllOrders,
            "closePositions" => NodeKind::ClosePositions,
            "telegramAlert" => NodeKind::TelegramAlert,
            "httpRequest" => NodeKind::HttpRequest,
            "log" => NodeKind::Log,
            "getQuote" => NodeKind::GetQuote,
            "multiQuotes" => NodeKind::MultiQuotes,
            "getDepth" => NodeKind::GetDepth,
            "getOrderStatus" => NodeKind::GetOrderStatus,
            "openPosition" => NodeKind::OpenPosition,
            "history" => NodeKind::History,
            "expiry" => NodeKind::Expiry,
            "symbol" => NodeKind::Symbol,
            "optionSymbol" => NodeKind::OptionSymbol,
            "orderBook" => NodeKind::OrderBook,
            "tradeBook" => NodeKind::TradeBook,
            "positionBook" => NodeKind::PositionBook,
            "syntheticFuture" => NodeKind::SyntheticFuture,
            "optionChain" => NodeKind::OptionChain,
            "holidays" => NodeKind::Holidays,
            "timings" => NodeKind::Timings,
            "holdings" => NodeKind::Holdings,
            "funds" => NodeKind::Funds,
            "margin" => NodeKind::Margin,
            "subscribeLtp" => NodeKind::SubscribeLtp,
            "subscribeQuote" => NodeKind::SubscribeQuote,
            "subscribeDepth" => NodeKind::SubscribeDepth,
            "unsubscribe" => NodeKind::Unsubscribe,
            "delay" => NodeKind::Delay,
            "waitUntil" => NodeKind::WaitUntil,
            "variable" => NodeKind::Variable,
            "mathExpression" => NodeKind::MathExpression,
            "positionCheck" => NodeKind::PositionCheck,
            "fundCheck" => NodeKind::FundCheck,
            "priceCondition" => NodeKind::PriceCondition,
            "priceAlert" => NodeKind::PriceAlert,
            "timeWindow" => NodeKind::TimeWindow,
            "timeCondition" => NodeKind::TimeCondition,
            "andGate" => NodeKind::AndGate,
            "orGate" => NodeKind::OrGate,
            "notGate" => NodeKind::NotGate,
            other => NodeKind::Unknown(other.to_string()),
        }
    }

    /// Encode a `NodeKind` into its persisted string form.
    #[must_use]
    pub fn encode(&self) -> &str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Group => "group",
            NodeKind::PlaceOrder => "placeOrder",
            NodeKind::SmartOrder => "smartOrder",
            NodeKind::OptionsOrder => "optionsOrder",
            NodeKind::OptionsMultiOrder => "optionsMultiOrder",
            NodeKind::BasketOrder => "basketOrder",
            NodeKind::SplitOrder => "splitOrder",
            NodeKind::ModifyOrder => "modifyOrder",
            NodeKind::CancelOrder => "cancelOrder",
            NodeKind::CancelAllOrders => "cancelAllOrders",
            NodeKind::ClosePositions => "closePositions",
            NodeKind::TelegramAlert => "telegramAlert",
            NodeKind::HttpRequest => "httpRequest",
            NodeKind::Log => "log",
            NodeKind::GetQuote => "getQuote",
            NodeKind::MultiQuotes => "multiQuotes",
            NodeKind::GetDepth => "getDepth",
            NodeKind::GetOrderStatus => "getOrderStatus",
            NodeKind::OpenPosition => "openPosition",
            NodeKind::History => "history",
            NodeKind::Expiry => "expiry",
            NodeKind::Symbol => "symbol",
            NodeKind::OptionSymbol => "optionSymbol",
            NodeKind::OrderBook => "orderBook",
            NodeKind::TradeBook => "tradeBook",
            NodeKind::PositionBook => "positionBook",
            NodeKind::SyntheticFuture => "syntheticFuture",
            NodeKind::OptionChain => "optionChain",
            NodeKind::Holidays => "holidays",
            NodeKind::Timings => "timings",
            NodeKind::Holdings => "holdings",
            NodeKind::Funds => "funds",
            NodeKind::Margin => "margin",
            NodeKind::SubscribeLtp => "subscribeLtp",
            NodeKind::SubscribeQuote => "subscribeQuote",
            NodeKind::SubscribeDepth => "subscribeDepth",
            NodeKind::Unsubscribe => "unsubscribe",
            NodeKind::Delay => "delay",
            NodeKind::WaitUntil => "waitUntil",
            NodeKind::Variable => "variable",
            NodeKind::MathExpression => "mathExpression",
            NodeKind::PositionCheck => "positionCheck",
            NodeKind::FundCheck => "fundCheck",
            NodeKind::PriceCondition => "priceCondition",
            NodeKind::PriceAlert => "priceAlert",
            NodeKind::TimeWindow => "timeWindow",
            NodeKind::TimeCondition => "timeCondition",
            NodeKind::AndGate => "andGate",
            NodeKind::OrGate => "orGate",
            NodeKind::NotGate => "notGate",
            NodeKind::Unknown(s) => s.as_str(),
        }
    }

    /// Returns `true` if this is the [`Start`](Self::Start) node.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` for logic gates, which consume upstream condition
    /// results instead of computing their own.
    #[must_use]
    pub fn is_gate(&self) -> bool {
        matches!(self, Self::AndGate | Self::OrGate | Self::NotGate)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        NodeKind::decode(&s)
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.encode().to_string()
    }
}

impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        NodeKind::decode(s)
    }
}
