//! Shared fixtures for integration tests.
// Each test binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;

use tradeweave::event_bus::EventHub;
use tradeweave::runtimes::{Engine, Store};
use tradeweave::scheduler::WorkflowScheduler;
use tradeweave::secret;
use tradeweave::server::AppState;

/// An engine wired to a scratch database with the gateway key sealed in,
/// pointing at `gateway_host` (usually an httpmock server).
pub struct TestHarness {
    pub engine: Arc<Engine>,
    pub state: AppState,
    _dir: TempDir,
}

pub async fn harness(gateway_host: &str) -> TestHarness {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let store = Store::connect(&url).await.expect("store");
    store
        .update_gateway_settings(
            Some(&secret::seal("test-key")),
            gateway_host,
            "ws://127.0.0.1:1",
        )
        .await
        .expect("settings");
    let engine = Arc::new(Engine::new(store, EventHub::default()));
    let scheduler = Arc::new(WorkflowScheduler::new(Arc::clone(&engine)));
    let state = AppState::new(Arc::clone(&engine), scheduler);
    TestHarness {
        engine,
        state,
        _dir: dir,
    }
}

pub async fn create_workflow(
    harness: &TestHarness,
    name: &str,
    nodes: Value,
    edges: Value,
) -> i64 {
    harness
        .engine
        .store()
        .create_workflow(name, None, &nodes, &edges)
        .await
        .expect("create workflow")
        .id
}
