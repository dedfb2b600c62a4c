use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use chargepilot::api;
use chargepilot::config::{AppConfig, SimulationConfig};
use chargepilot::control::Controller;
use chargepilot::store::StateStore;
use chargepilot::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cfg = AppConfig::load()?;
    let store = Arc::new(StateStore::open(&cfg.storage.path)?);

    let controller = Arc::new(Controller::new(cfg.clone(), Arc::clone(&store))?);
    tokio::spawn({
        let controller = Arc::clone(&controller);
        async move {
            if let Err(e) = controller.run().await {
                warn!(error = %e, "control loop stopped");
            }
        }
    });

    let app = api::router(api::ApiState {
        store,
        sim_config: SimulationConfig::from_app(&cfg),
    });

    let addr = cfg.server.socket_addr()?;
    info!(%addr, interval_seconds = cfg.logic.interval_seconds, "starting chargepilot");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
