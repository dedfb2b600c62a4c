use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::backtest::{compute_series, BacktestOptions, BacktestSeries};
use crate::domain::{HistoryPoint, SnapshotPayload};

use super::error::ApiError;
use super::ApiState;

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    version: &'static str,
    timestamp: DateTime<Utc>,
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

/// GET /api/v1/snapshot - latest scheduler snapshot
pub async fn snapshot(
    State(state): State<ApiState>,
) -> Result<Json<SnapshotPayload>, ApiError> {
    state
        .store
        .latest_snapshot()?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no snapshot recorded yet".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    /// Window length in hours, counted back from now.
    #[serde(default = "default_window_hours")]
    pub hours: f64,
}

fn default_window_hours() -> f64 {
    24.0
}

/// GET /api/v1/history?hours=24 - observed interval boundaries
pub async fn history(
    State(state): State<ApiState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<HistoryPoint>>, ApiError> {
    if !query.hours.is_finite() || query.hours <= 0.0 {
        return Err(ApiError::BadRequest("hours must be positive".to_string()));
    }
    let since = Utc::now() - Duration::milliseconds((query.hours * 3_600_000.0) as i64);
    Ok(Json(state.store.history_since(since)?))
}

/// GET /api/v1/backtest/series?hours=24 - smart-vs-dumb replay
pub async fn backtest_series(
    State(state): State<ApiState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<BacktestSeries>, ApiError> {
    if !query.hours.is_finite() || query.hours <= 0.0 {
        return Err(ApiError::BadRequest("hours must be positive".to_string()));
    }
    let now = Utc::now();
    let since = now - Duration::milliseconds((2.0 * query.hours * 3_600_000.0) as i64);
    let history = state.store.history_since(since)?;

    compute_series(
        &state.sim_config,
        &history,
        &BacktestOptions {
            window_hours: query.hours,
            reference_timestamp: Some(now),
            ..Default::default()
        },
        now,
    )
    .map(Json)
    .ok_or_else(|| ApiError::NotFound("not enough history for a backtest".to_string()))
}
