use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use tradeweave::config::Config;
use tradeweave::event_bus::EventHub;
use tradeweave::runtimes::{Engine, Store};
use tradeweave::scheduler::WorkflowScheduler;
use tradeweave::server::{self, AppState};
use tradeweave::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();
    let config = Config::from_env();
    info!(database_url = %config.database_url, "starting TradeWeave");

    let store = Store::connect(&config.database_url).await?;
    let engine = Arc::new(Engine::new(store, EventHub::default()));
    let scheduler = Arc::new(WorkflowScheduler::new(Arc::clone(&engine)));

    // Re-arm schedule jobs for workflows left active by the previous run.
    let restored = scheduler.restore().await?;
    if restored > 0 {
        info!(restored, "re-armed schedule jobs");
    }

    let state = AppState::new(engine, Arc::clone(&scheduler));
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await?;

    scheduler.shutdown();
    Ok(())
}
