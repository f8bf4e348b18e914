//! Node handlers.
//!
//! Every node kind maps to exactly one handler method on [`NodeExecutor`].
//! Handlers take the node's data bag, consult the execution's
//! [`WorkflowContext`], call the gateway where needed, append to the
//! execution log, and return a [`HandlerReport`]. Handler errors are
//! *local*: they are recorded and traversal continues along default edges;
//! only traversal-level bounds and system errors abort a run.
//!
//! Handler families live in submodules:
//! - [`orders`]: side-effecting order operations
//! - [`options`]: options orders, strategy leg synthesis, expiry resolution
//! - [`market`]: read-only gateway queries
//! - [`streaming`]: subscribe-with-fallback and unsubscribe
//! - [`control`]: delay, wait-until, log, HTTP request
//! - [`variable`]: the variable mini-language and math expressions
//! - [`conditions`]: boolean-producing checks
//! - [`gates`]: AND/OR/NOT over upstream condition results

pub mod conditions;
pub mod control;
pub mod gates;
pub mod market;
pub mod options;
pub mod orders;
pub mod streaming;
pub mod variable;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::context::WorkflowContext;
use crate::gateway::{Envelope, GatewayClient, StreamClient};
use crate::graph::NodeRecord;
use crate::runtimes::records::{LogEntry, LogLevel};
use crate::types::NodeKind;

/// Outcome tag of a handler run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerStatus {
    Success,
    Error,
}

/// The result record a handler returns: status, an optional condition for
/// edge routing, and kind-specific fields.
#[derive(Clone, Debug)]
pub struct HandlerReport {
    pub status: HandlerStatus,
    pub condition: Option<bool>,
    pub message: Option<String>,
    pub fields: Map<String, Value>,
}

impl HandlerReport {
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: HandlerStatus::Success,
            condition: None,
            message: None,
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HandlerStatus::Error,
            condition: None,
            message: Some(message.into()),
            fields: Map::new(),
        }
    }

    /// Fold a gateway envelope into a report, carrying its message along.
    #[must_use]
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            status: if envelope.is_success() {
                HandlerStatus::Success
            } else {
                HandlerStatus::Error
            },
            condition: None,
            message: envelope.message.clone(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: bool) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn ok(&self) -> bool {
        self.status == HandlerStatus::Success
    }
}

/// Executes individual workflow nodes.
///
/// One `NodeExecutor` lives for the duration of a single execution; it
/// owns the variable context and the log buffer and holds the gateway
/// clients built from the current settings.
pub struct NodeExecutor {
    pub(crate) gateway: GatewayClient,
    pub(crate) stream: StreamClient,
    pub context: WorkflowContext,
    pub logs: Vec<LogEntry>,
}

impl NodeExecutor {
    #[must_use]
    pub fn new(gateway: GatewayClient, stream: StreamClient) -> Self {
        Self {
            gateway,
            stream,
            context: WorkflowContext::new(),
            logs: Vec::new(),
        }
    }

    /// Append to the execution log, mirroring to tracing at the matching
    /// level.
    pub fn log(&mut self, message: impl Into<String>, level: LogLevel) {
        let message = message.into();
        match level {
            LogLevel::Error => error!("{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Info => info!("{message}"),
        }
        self.logs.push(LogEntry {
            time: chrono::Utc::now(),
            level,
            message,
        });
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log(message, LogLevel::Info);
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.log(message, LogLevel::Warning);
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.log(message, LogLevel::Error);
    }

    /// Log a gateway result under `prefix`, as an error line when the
    /// envelope carries one.
    pub(crate) fn log_envelope(&mut self, prefix: &str, envelope: &Envelope) {
        let level = if envelope.is_success() {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        self.log(format!("{prefix}: {}", envelope.to_value()), level);
    }

    /// Store `result` under the node's `outputVariable`, if configured.
    pub(crate) fn store_output(&mut self, data: &Map<String, Value>, result: Value) {
        let Some(name) = data
            .get("outputVariable")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
        else {
            return;
        };
        let name = name.to_string();
        self.context.set_variable(name.clone(), result);
        self.log_info(format!("Stored result in variable: {name}"));
    }

    /// Dispatch a node to its handler.
    ///
    /// Returns `None` for nodes with no result record: `start` (logs and
    /// continues), `group` (visual container), and unknown kinds (warned
    /// and passed through). `gate_inputs` carries the upstream condition
    /// results for logic gates, already looked up by the traverser.
    pub async fn dispatch(
        &mut self,
        node: &NodeRecord,
        gate_inputs: &[bool],
    ) -> Option<HandlerReport> {
        let data = &node.data;
        let report = match &node.kind {
            NodeKind::Start => {
                self.log_info("Workflow started");
                return None;
            }
            NodeKind::Group => return None,
            NodeKind::Unknown(tag) => {
                self.log_warning(format!("Unknown node type: {tag}"));
                return None;
            }

            NodeKind::PlaceOrder => self.place_order(data).await,
            NodeKind::SmartOrder => self.smart_order(data).await,
            NodeKind::OptionsOrder => self.options_order(data).await,
            NodeKind::OptionsMultiOrder => self.options_multi_order(data).await,
            NodeKind::BasketOrder => self.basket_order(data).await,
            NodeKind::SplitOrder => self.split_order(data).await,
            NodeKind::ModifyOrder => self.modify_order(data).await,
            NodeKind::CancelOrder => self.cancel_order(data).await,
            NodeKind::CancelAllOrders => self.cancel_all_orders(data).await,
            NodeKind::ClosePositions => self.close_positions(data).await,
            NodeKind::TelegramAlert => self.telegram_alert(data).await,
            NodeKind::HttpRequest => self.http_request(data).await,
            NodeKind::Log => self.log_node(data),

            NodeKind::GetQuote => self.get_quote(data).await,
            NodeKind::MultiQuotes => self.multi_quotes(data).await,
            NodeKind::GetDepth => self.get_depth(data).await,
            NodeKind::GetOrderStatus => self.get_order_status(data).await,
            NodeKind::OpenPosition => self.open_position(data).await,
            NodeKind::History => self.history(data).await,
            NodeKind::Expiry => self.expiry(data).await,
            NodeKind::Symbol => self.symbol(data).await,
            NodeKind::OptionSymbol => self.option_symbol(data).await,
            NodeKind::OrderBook => self.order_book(data).await,
            NodeKind::TradeBook => self.trade_book(data).await,
            NodeKind::PositionBook => self.position_book(data).await,
            NodeKind::SyntheticFuture => self.synthetic_future(data).await,
            NodeKind::OptionChain => self.option_chain(data).await,
            NodeKind::Holidays => self.holidays(data).await,
            NodeKind::Timings => self.timings(data).await,
            NodeKind::Holdings => self.holdings(data).await,
            NodeKind::Funds => self.funds(data).await,
            NodeKind::Margin => self.margin(data).await,

            NodeKind::SubscribeLtp => self.subscribe_ltp(data).await,
            NodeKind::SubscribeQuote => self.subscribe_quote(data).await,
            NodeKind::SubscribeDepth => self.subscribe_depth(data).await,
            NodeKind::Unsubscribe => self.unsubscribe(data),

            NodeKind::Delay => self.delay(data).await,
            NodeKind::WaitUntil => self.wait_until(data).await,
            NodeKind::Variable => self.variable(data),
            NodeKind::MathExpression => self.math_expression(data),

            NodeKind::PositionCheck => self.position_check(data).await,
            NodeKind::FundCheck => self.fund_check(data).await,
            NodeKind::PriceCondition => self.price_condition(data).await,
            NodeKind::PriceAlert => self.price_alert(data).await,
            NodeKind::TimeWindow => self.time_window(data),
            NodeKind::TimeCondition => self.time_condition(data),

            NodeKind::AndGate => self.and_gate(gate_inputs),
            NodeKind::OrGate => self.or_gate(gate_inputs),
            NodeKind::NotGate => self.not_gate(gate_inputs),
        };
        Some(report)
    }
}
