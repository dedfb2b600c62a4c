use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::units::{Energy, EnergyPrice, Percentage, Power, TimeSlot};

/// A priced tariff interval from a day-ahead market source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSlot {
    pub slot: TimeSlot,
    pub price: EnergyPrice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub era_id: Option<String>,
}

impl PriceSlot {
    pub fn new(slot: TimeSlot, price: EnergyPrice) -> Self {
        Self {
            slot,
            price,
            era_id: None,
        }
    }
}

/// Expected PV generation over an interval. Energy is non-negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarSlot {
    pub slot: TimeSlot,
    pub energy: Energy,
}

impl SolarSlot {
    pub fn new(slot: TimeSlot, energy: Energy) -> Self {
        Self {
            slot,
            energy: Energy::watt_hours(energy.as_watt_hours().max(0.0)),
        }
    }
}

/// A typed forecast input attached to an era.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForecastSource {
    Cost {
        provider: String,
        price: EnergyPrice,
    },
    Solar {
        provider: String,
        energy: Energy,
    },
}

impl ForecastSource {
    pub fn provider(&self) -> &str {
        match self {
            Self::Cost { provider, .. } | Self::Solar { provider, .. } => provider,
        }
    }

    pub fn is_cost(&self) -> bool {
        matches!(self, Self::Cost { .. })
    }

    pub fn is_solar(&self) -> bool {
        matches!(self, Self::Solar { .. })
    }
}

/// Unified time bucket joining price and solar sources on one grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastEra {
    pub era_id: String,
    pub slot: TimeSlot,
    pub sources: Vec<ForecastSource>,
}

impl ForecastEra {
    /// Primary cost source, first in attach order.
    pub fn price(&self) -> Option<EnergyPrice> {
        self.sources.iter().find_map(|s| match s {
            ForecastSource::Cost { price, .. } => Some(*price),
            ForecastSource::Solar { .. } => None,
        })
    }

    pub fn solar_energy(&self) -> Energy {
        self.sources
            .iter()
            .find_map(|s| match s {
                ForecastSource::Solar { energy, .. } => Some(*energy),
                ForecastSource::Cost { .. } => None,
            })
            .unwrap_or_default()
    }
}

/// Live observations from the home energy manager, used to seed a cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveObservations {
    pub battery_soc: Option<Percentage>,
    pub grid_power: Option<Power>,
    pub solar_power: Option<Power>,
    pub home_power: Option<Power>,
    pub snapshot_price: Option<EnergyPrice>,
    pub fetched_at: Option<DateTime<Utc>>,
}
