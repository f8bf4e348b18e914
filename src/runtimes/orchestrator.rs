//! Execution orchestrator.
//!
//! Owns the per-workflow single-flight locks and the execution-record
//! lifecycle. For each invocation: acquire the workflow's lock without
//! waiting, create the execution record, build the gateway clients from
//! current settings, traverse the graph, and record the outcome — every
//! failure path lands in the record's `error` and log, never in a panic
//! or a dangling `running` row.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::event_bus::{EventHub, ExecutionEvent};
use crate::gateway::{GatewayClient, StreamClient};
use crate::graph::WorkflowGraph;
use crate::handlers::NodeExecutor;
use crate::runtimes::records::{ExecutionStatus, LogEntry};
use crate::runtimes::store::Store;
use crate::secret;
use crate::traversal::Traverser;

/// What an invocation returns to its caller (HTTP route, scheduler tick,
/// or webhook).
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub ok: bool,
    pub message: String,
    pub execution_id: Option<i64>,
    pub logs: Vec<LogEntry>,
    pub already_running: bool,
}

impl ExecutionOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            execution_id: None,
            logs: Vec::new(),
            already_running: false,
        }
    }

    fn busy() -> Self {
        Self {
            already_running: true,
            ..Self::error(
                "Workflow is already running. Please wait for the current execution to complete.",
            )
        }
    }
}

/// Process-wide execution engine shared by the HTTP server, the
/// scheduler, and webhook ingress.
pub struct Engine {
    store: Store,
    hub: EventHub,
    // Lazily created per-workflow locks; the map itself is mutex-guarded.
    locks: Mutex<FxHashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    // One streaming client per socket URL; rebuilt when settings change.
    stream: Mutex<Option<(String, StreamClient)>>,
}

impl Engine {
    #[must_use]
    pub fn new(store: Store, hub: EventHub) -> Self {
        Self {
            store,
            hub,
            locks: Mutex::new(FxHashMap::default()),
            stream: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    fn workflow_lock(&self, workflow_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(workflow_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// The shared streaming client for the configured socket URL. A URL
    /// change tears down the old socket and builds a fresh client.
    fn stream_client(&self, ws_url: &str, api_key: &str) -> StreamClient {
        let mut guard = self.stream.lock();
        if let Some((url, client)) = &*guard {
            if url == ws_url {
                return client.clone();
            }
        }
        if let Some((_, old)) = guard.take() {
            old.disconnect();
        }
        let client = StreamClient::new(ws_url, api_key);
        *guard = Some((ws_url.to_string(), client.clone()));
        client
    }

    /// Execute a workflow once, with single-flight protection.
    ///
    /// A `webhook` payload is injected as `variables["webhook"]` so graphs
    /// can reference `{{webhook.field}}`.
    #[instrument(skip(self, webhook))]
    pub async fn execute_workflow(
        &self,
        workflow_id: i64,
        webhook: Option<Value>,
    ) -> ExecutionOutcome {
        let lock = self.workflow_lock(workflow_id);
        let Ok(_guard) = lock.try_lock() else {
            warn!(workflow_id, "workflow already running, skipping execution");
            return ExecutionOutcome::busy();
        };

        let workflow = match self.store.get_workflow(workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => return ExecutionOutcome::error("Workflow not found"),
            Err(err) => return ExecutionOutcome::error(err.to_string()),
        };

        let execution = match self.store.create_execution(workflow_id).await {
            Ok(execution) => execution,
            Err(err) => return ExecutionOutcome::error(err.to_string()),
        };
        self.hub.emit(ExecutionEvent::running(
            workflow_id,
            format!("Starting workflow: {}", workflow.name),
        ));

        // Settings are re-read per execution so credential or URL changes
        // apply without a restart.
        let settings = match self.store.settings().await {
            Ok(settings) => settings,
            Err(err) => {
                return self
                    .fail(workflow_id, execution.id, Vec::new(), err.to_string())
                    .await;
            }
        };
        let api_key = settings
            .gateway_api_key
            .as_deref()
            .and_then(secret::open);
        let Some(api_key) = api_key else {
            return self
                .fail(
                    workflow_id,
                    execution.id,
                    Vec::new(),
                    "Gateway not configured".to_string(),
                )
                .await;
        };

        let gateway = GatewayClient::new(api_key.clone(), settings.gateway_host.clone());
        let stream = self.stream_client(&settings.gateway_ws_url, &api_key);
        let mut executor = NodeExecutor::new(gateway, stream);
        if let Some(payload) = webhook {
            executor.context.set_variable("webhook", payload);
        }
        executor.log_info(format!("Starting workflow: {}", workflow.name));

        let graph = match WorkflowGraph::from_json(&workflow.nodes, &workflow.edges) {
            Ok(graph) => graph,
            Err(err) => {
                return self
                    .fail(workflow_id, execution.id, executor.logs, err.to_string())
                    .await;
            }
        };
        let Some(start) = graph.start_node() else {
            return self
                .fail(
                    workflow_id,
                    execution.id,
                    executor.logs,
                    "No start node found".to_string(),
                )
                .await;
        };
        let start_id = start.id.clone();

        let traverser = Traverser::new(&graph, &self.hub, workflow_id);
        match traverser.run(&mut executor, &start_id).await {
            Ok(()) => {
                if let Err(err) = self
                    .store
                    .finish_execution(
                        execution.id,
                        ExecutionStatus::Completed,
                        None,
                        &executor.logs,
                    )
                    .await
                {
                    warn!(error = %err, "failed to persist completed execution");
                }
                self.hub.emit(ExecutionEvent::completed(
                    workflow_id,
                    "Workflow executed successfully",
                ));
                ExecutionOutcome {
                    ok: true,
                    message: "Workflow executed successfully".to_string(),
                    execution_id: Some(execution.id),
                    logs: executor.logs,
                    already_running: false,
                }
            }
            Err(err) => {
                self.fail(workflow_id, execution.id, executor.logs, err.to_string())
                    .await
            }
        }
    }

    /// Terminal failure path: append the error log line, persist the
    /// failed record, broadcast, and build the caller's envelope.
    async fn fail(
        &self,
        workflow_id: i64,
        execution_id: i64,
        mut logs: Vec<LogEntry>,
        message: String,
    ) -> ExecutionOutcome {
        logs.push(LogEntry::error(format!("Error: {message}")));
        if let Err(err) = self
            .store
            .finish_execution(execution_id, ExecutionStatus::Failed, Some(&message), &logs)
            .await
        {
            warn!(error = %err, "failed to persist failed execution");
        }
        self.hub
            .emit(ExecutionEvent::failed(workflow_id, message.clone()));
        ExecutionOutcome {
            ok: false,
            message,
            execution_id: Some(execution_id),
            logs,
            already_running: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtimes::records::ExecutionStatus;
    use serde_json::json;

    async fn engine_with_key() -> (Arc<Engine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let store = Store::connect(&url).await.unwrap();
        store
            .update_gateway_settings(
                Some(&secret::seal("test-key")),
                "http://127.0.0.1:1",
                "ws://127.0.0.1:1",
            )
            .await
            .unwrap();
        (Arc::new(Engine::new(store, EventHub::default())), dir)
    }

    #[tokio::test]
    async fn missing_workflow_is_an_error_without_record() {
        let (engine, _dir) = engine_with_key().await;
        let outcome = engine.execute_workflow(404, None).await;
        assert!(!outcome.ok);
        assert!(!outcome.already_running);
        assert_eq!(outcome.execution_id, None);
    }

    #[tokio::test]
    async fn missing_start_node_fails_before_any_handler() {
        let (engine, _dir) = engine_with_key().await;
        let workflow = engine
            .store()
            .create_workflow(
                "no-start",
                None,
                &json!([{"id": "1", "type": "log", "data": {}}]),
                &json!([]),
            )
            .await
            .unwrap();
        let outcome = engine.execute_workflow(workflow.id, None).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.message, "No start node found");
        let execution = engine
            .store()
            .get_execution(outcome.execution_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("No start node found"));
    }

    #[tokio::test]
    async fn unconfigured_gateway_fails_the_execution() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let store = Store::connect(&url).await.unwrap();
        let engine = Engine::new(store, EventHub::default());
        let workflow = engine
            .store()
            .create_workflow(
                "w",
                None,
                &json!([{"id": "1", "type": "start", "data": {}}]),
                &json!([]),
            )
            .await
            .unwrap();
        let outcome = engine.execute_workflow(workflow.id, None).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.message, "Gateway not configured");
    }

    #[tokio::test]
    async fn completed_run_persists_logs_and_emits_events() {
        let (engine, _dir) = engine_with_key().await;
        let workflow = engine
            .store()
            .create_workflow(
                "logger",
                None,
                &json!([
                    {"id": "1", "type": "start", "data": {}},
                    {"id": "2", "type": "log", "data": {"message": "hello {{date}}"}},
                ]),
                &json!([{"source": "1", "target": "2"}]),
            )
            .await
            .unwrap();

        let mut events = engine.hub().subscribe();
        let outcome = engine.execute_workflow(workflow.id, None).await;
        assert!(outcome.ok, "{}", outcome.message);

        let execution = engine
            .store()
            .get_execution(outcome.execution_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution
            .logs
            .iter()
            .any(|entry| entry.message.starts_with("[LOG] hello")));

        let statuses: Vec<String> = vec![
            events.recv().await.unwrap().status,
            events.recv().await.unwrap().status,
            events.recv().await.unwrap().status,
        ];
        assert_eq!(statuses, vec!["running", "node_executed", "completed"]);
    }

    #[tokio::test]
    async fn webhook_payload_reaches_templates() {
        let (engine, _dir) = engine_with_key().await;
        let workflow = engine
            .store()
            .create_workflow(
                "hooked",
                None,
                &json!([
                    {"id": "1", "type": "start", "data": {}},
                    {"id": "2", "type": "log", "data": {"message": "sym={{webhook.symbol}}"}},
                ]),
                &json!([{"source": "1", "target": "2"}]),
            )
            .await
            .unwrap();
        let outcome = engine
            .execute_workflow(workflow.id, Some(json!({"symbol": "INFY"})))
            .await;
        assert!(outcome.ok);
        assert!(outcome
            .logs
            .iter()
            .any(|entry| entry.message.contains("sym=INFY")));
    }

    #[tokio::test]
    async fn second_invocation_is_rejected_while_running() {
        let (engine, _dir) = engine_with_key().await;
        let workflow = engine
            .store()
            .create_workflow(
                "slow",
                None,
                &json!([
                    {"id": "1", "type": "start", "data": {}},
                    {"id": "2", "type": "delay", "data": {"delayMs": 300}},
                ]),
                &json!([{"source": "1", "target": "2"}]),
            )
            .await
            .unwrap();

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            let id = workflow.id;
            async move { engine.execute_workflow(id, None).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let second = engine.execute_workflow(workflow.id, None).await;
        assert!(second.already_running);
        assert_eq!(second.execution_id, None);

        let first = first.await.unwrap();
        assert!(first.ok);
        // Only the first invocation created an execution row.
        let executions = engine.store().list_executions(workflow.id, 10).await.unwrap();
        assert_eq!(executions.len(), 1);
    }
}
