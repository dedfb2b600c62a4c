use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::OracleEntry;

/// Scheduler failures. Recoverable input gaps are handled by the control
/// loop before the engine runs; these are the arithmetic dead ends.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no forecast slots available")]
    EmptyForecast,
}

/// Per-run toggles on top of the static [`crate::config::SimulationConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SimulationOptions {
    /// Allow pulling charge energy from the grid. The control loop runs a
    /// second pass with this disabled to price a "basic battery".
    pub allow_grid_charge: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            allow_grid_charge: true,
        }
    }
}

/// Result of one scheduler run over the forecast horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub timestamp: DateTime<Utc>,
    pub initial_soc_percent: f64,
    pub next_step_soc_percent: f64,
    /// Target handed to the command translator.
    pub recommended_soc_percent: f64,
    pub projected_cost_eur: f64,
    /// Cost of the same horizon with the battery held idle.
    pub baseline_cost_eur: f64,
    pub projected_savings_eur: f64,
    pub projected_grid_power_w: f64,
    pub average_price_eur_per_kwh: f64,
    pub forecast_hours: f64,
    pub forecast_samples: usize,
    pub oracle_entries: Vec<OracleEntry>,
}
