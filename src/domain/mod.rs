pub mod forecast;
pub mod snapshot;
pub mod units;

pub use forecast::{ForecastEra, ForecastSource, LiveObservations, PriceSlot, SolarSlot};
pub use snapshot::{HistoryPoint, InverterMode, OracleEntry, SnapshotPayload, Strategy};
pub use units::{Energy, EnergyPrice, Percentage, Power, TimeSlot};
