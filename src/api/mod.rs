pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::SimulationConfig;
use crate::store::StateStore;

/// Read-only view shared with the HTTP handlers. The control loop is the
/// only writer; handlers get deserialized copies out of the store.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<StateStore>,
    pub sim_config: SimulationConfig,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .route("/health", get(handlers::health))
                .route("/snapshot", get(handlers::snapshot))
                .route("/history", get(handlers::history))
                .route("/backtest/series", get(handlers::backtest_series))
                .with_state(state),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
