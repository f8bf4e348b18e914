//! Execution progress broadcasting.
//!
//! The orchestrator and traverser emit [`ExecutionEvent`]s as a run moves
//! through its lifecycle; the WebSocket endpoint (and tests) subscribe to
//! the hub and relay them. The hub is a thin wrapper around
//! `tokio::sync::broadcast`: emitting never blocks, and a slow subscriber
//! only lags itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// A single progress event: `{workflow_id, status, message, timestamp}`
/// plus an optional per-node success flag.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionEvent {
    pub workflow_id: i64,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionEvent {
    fn new(workflow_id: i64, status: &str, message: impl Into<String>, ok: Option<bool>) -> Self {
        Self {
            workflow_id,
            status: status.to_string(),
            message: message.into(),
            ok,
            timestamp: Utc::now(),
        }
    }

    pub fn running(workflow_id: i64, message: impl Into<String>) -> Self {
        Self::new(workflow_id, "running", message, None)
    }

    pub fn completed(workflow_id: i64, message: impl Into<String>) -> Self {
        Self::new(workflow_id, "completed", message, None)
    }

    pub fn failed(workflow_id: i64, message: impl Into<String>) -> Self {
        Self::new(workflow_id, "failed", message, None)
    }

    /// Emitted after each non-start node handler runs.
    pub fn node_executed(workflow_id: i64, label: &str, ok: bool) -> Self {
        Self::new(workflow_id, "node_executed", format!("Executed: {label}"), Some(ok))
    }
}

/// Broadcast hub for execution events.
#[derive(Clone, Debug)]
pub struct EventHub {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl EventHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers. With no subscribers the
    /// event is dropped; progress streaming is best-effort.
    pub fn emit(&self, event: ExecutionEvent) {
        if let Err(err) = self.tx.send(event) {
            tracing::trace!(error = %err, "no subscribers for execution event");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }
}

/// A subscription handle yielding events as they are emitted.
pub struct EventStream {
    rx: broadcast::Receiver<ExecutionEvent>,
}

impl EventStream {
    /// Receive the next event. Lagged receivers skip ahead rather than
    /// erroring; `None` means the hub has been dropped.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "execution event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let hub = EventHub::default();
        let mut stream = hub.subscribe();
        hub.emit(ExecutionEvent::running(7, "Starting workflow: demo"));
        let event = stream.recv().await.unwrap();
        assert_eq!(event.workflow_id, 7);
        assert_eq!(event.status, "running");
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_silent() {
        let hub = EventHub::default();
        hub.emit(ExecutionEvent::completed(1, "done"));
    }

    #[test]
    fn node_event_carries_flag() {
        let event = ExecutionEvent::node_executed(3, "Buy RELIANCE", false);
        assert_eq!(event.status, "node_executed");
        assert_eq!(event.ok, Some(false));
        assert_eq!(event.message, "Executed: Buy RELIANCE");
    }
}
