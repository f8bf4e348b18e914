//! # TradeWeave: Graph-driven Trading Workflow Engine
//!
//! TradeWeave executes user-defined workflow graphs against a brokerage
//! gateway: nodes are actions (orders, alerts, HTTP calls), queries
//! (quotes, books, chains), conditionals, and logic gates; edges carry
//! the `yes`/`no` branches that condition results select between.
//! Workflows run on demand, on a schedule, or from a webhook, with
//! per-workflow single-flight protection and live progress broadcast.
//!
//! ## Core concepts
//!
//! - **Graph**: `{id, type, data}` nodes and `{source, target,
//!   sourceHandle?}` edges, persisted as editor JSON ([`graph`])
//! - **Context**: per-execution variables with `{{ path }}` template
//!   interpolation and a condition-result memo ([`context`])
//! - **Handlers**: one per node kind, consuming the context and the
//!   gateway client ([`handlers`])
//! - **Traversal**: sequential depth-first descent with loop protection
//!   ([`traversal`])
//! - **Orchestrator**: execution records, error capture, single-flight
//!   ([`runtimes`])
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tradeweave::event_bus::EventHub;
//! use tradeweave::runtimes::{Engine, Store};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::connect("sqlite://tradeweave.db").await?;
//! let engine = Arc::new(Engine::new(store, EventHub::default()));
//!
//! // Execute workflow 1, no webhook payload.
//! let outcome = engine.execute_workflow(1, None).await;
//! println!("{}: {}", outcome.ok, outcome.message);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`types`] - Node kind tags
//! - [`graph`] - Graph model and adjacency indexing
//! - [`context`] - Variables, interpolation, condition memo
//! - [`expr`] - Safe arithmetic evaluator
//! - [`gateway`] - Brokerage REST + streaming clients
//! - [`handlers`] - Node handlers by family
//! - [`traversal`] - Depth-first traverser with loop bounds
//! - [`event_bus`] - Execution progress broadcast
//! - [`runtimes`] - Store, records, orchestrator
//! - [`scheduler`] - Time-based activation
//! - [`server`] - HTTP API, auth, rate limits, WebSocket

pub mod config;
pub mod context;
pub mod event_bus;
pub mod expr;
pub mod gateway;
pub mod graph;
pub mod handlers;
pub mod runtimes;
pub mod scheduler;
pub mod secret;
pub mod server;
pub mod telemetry;
pub mod traversal;
pub mod types;
pub mod utils;
