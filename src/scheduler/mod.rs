pub mod engine;
pub mod types;

pub use engine::{simulate, SOC_STEPS};
pub use types::{SchedulerError, SimulationOptions, SimulationOutput};
