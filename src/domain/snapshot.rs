use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::forecast::ForecastEra;

/// Coarse per-slot action annotation on the planned SoC path.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Strategy {
    /// Additional grid import was scheduled to charge the battery.
    Charge,
    /// SoC effectively unchanged over the slot.
    Hold,
    /// Battery follows load/PV balance without forced grid charging.
    Auto,
}

/// One interval of the planned SoC trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleEntry {
    pub era_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub start_soc_percent: f64,
    pub end_soc_percent: f64,
    pub target_soc_percent: f64,
    pub grid_energy_wh: f64,
    pub strategy: Strategy,
}

/// The commanded inverter mode as last applied, kept on the snapshot so the
/// translator can de-duplicate across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InverterMode {
    Charge,
    Hold,
    Auto,
}

/// Scheduler output plus cycle context. Exactly one latest snapshot is
/// persisted; each control tick replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub timestamp: DateTime<Utc>,
    pub current_soc_percent: Option<f64>,
    pub next_step_soc_percent: Option<f64>,
    pub recommended_soc_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_mode: Option<InverterMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_target_soc_percent: Option<f64>,
    pub projected_cost_eur: Option<f64>,
    pub baseline_cost_eur: Option<f64>,
    pub projected_savings_eur: Option<f64>,
    /// Projected cost with grid charging disabled, for comparison.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_battery_cost_eur: Option<f64>,
    pub projected_grid_power_w: Option<f64>,
    pub average_price_eur_per_kwh: Option<f64>,
    pub forecast_hours: f64,
    pub forecast_samples: usize,
    #[serde(default)]
    pub eras: Vec<ForecastEra>,
    #[serde(default)]
    pub oracle_entries: Vec<OracleEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtested_savings_eur: Option<f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SnapshotPayload {
    /// Empty snapshot carrying only a timestamp, for cycles that could not run
    /// the scheduler at all.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            current_soc_percent: None,
            next_step_soc_percent: None,
            recommended_soc_percent: None,
            current_mode: None,
            applied_target_soc_percent: None,
            projected_cost_eur: None,
            baseline_cost_eur: None,
            projected_savings_eur: None,
            basic_battery_cost_eur: None,
            projected_grid_power_w: None,
            average_price_eur_per_kwh: None,
            forecast_hours: 0.0,
            forecast_samples: 0,
            eras: Vec::new(),
            oracle_entries: Vec::new(),
            backtested_savings_eur: None,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Observed state at one control interval boundary. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub battery_soc_percent: Option<f64>,
    pub price_eur_per_kwh: Option<f64>,
    pub price_ct_per_kwh: Option<f64>,
    pub grid_power_w: Option<f64>,
    pub solar_power_w: Option<f64>,
    pub solar_energy_wh: Option<f64>,
    pub home_power_w: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtested_savings_eur: Option<f64>,
}

impl HistoryPoint {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            battery_soc_percent: None,
            price_eur_per_kwh: None,
            price_ct_per_kwh: None,
            grid_power_w: None,
            solar_power_w: None,
            solar_energy_wh: None,
            home_power_w: None,
            backtested_savings_eur: None,
        }
    }

    /// Import price for this interval, preferring the canonical EUR value.
    pub fn resolve_price(&self) -> Option<f64> {
        self.price_eur_per_kwh
            .or(self.price_ct_per_kwh.map(|ct| ct / 100.0))
    }
}
