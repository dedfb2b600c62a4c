//! Snapshot to inverter-command translation.
//!
//! Collapses the scheduler's fine-grained plan into one of three coarse
//! commands and de-duplicates against the last applied state so the inverter
//! is not rewritten every tick.

use chrono::{DateTime, Utc};

use crate::config::SimulationConfig;
use crate::domain::{InverterMode, SnapshotPayload};
use crate::inverter::{CommandMode, InverterCommand};

/// SoC delta beyond which the plan reads as a charge/discharge intent (%).
const MODE_DELTA_PERCENT: f64 = 0.5;

/// Hold targets within this band of the prior target are not re-sent (%).
const HOLD_TOLERANCE_PERCENT: f64 = 1.0;

#[derive(Debug, Default)]
pub struct CommandTranslator {
    last_mode: Option<InverterMode>,
    last_target_percent: Option<f64>,
    last_issued_at: Option<DateTime<Utc>>,
}

impl CommandTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode the snapshot implies: explicit metadata wins, otherwise compare
    /// the planned next step against the observed SoC.
    fn infer_mode(snapshot: &SnapshotPayload) -> InverterMode {
        if let Some(mode) = snapshot.current_mode {
            return mode;
        }
        match (snapshot.next_step_soc_percent, snapshot.current_soc_percent) {
            (Some(next), Some(current)) => {
                let delta = next - current;
                if delta > MODE_DELTA_PERCENT {
                    InverterMode::Charge
                } else if delta.abs() <= MODE_DELTA_PERCENT {
                    InverterMode::Hold
                } else {
                    InverterMode::Auto
                }
            }
            _ => InverterMode::Auto,
        }
    }

    pub fn translate(
        &mut self,
        snapshot: &SnapshotPayload,
        config: &SimulationConfig,
        now: DateTime<Utc>,
        min_hold_minutes: u64,
    ) -> Option<InverterCommand> {
        let mode = Self::infer_mode(snapshot);
        let floor = config.floor_soc_percent;
        let ceiling = config.max_charge_soc_percent;

        let (command_mode, target) = match mode {
            InverterMode::Charge => (CommandMode::Manual, ceiling),
            InverterMode::Hold => {
                let target = snapshot
                    .current_soc_percent
                    .or(self.last_target_percent)
                    .unwrap_or(ceiling)
                    .clamp(floor, ceiling);
                (CommandMode::Manual, target)
            }
            InverterMode::Auto => {
                let target = if floor > 0.0 {
                    floor
                } else {
                    snapshot.next_step_soc_percent.unwrap_or(5.0)
                };
                (CommandMode::Auto, target)
            }
        };

        // De-duplicate: same mode, and for Hold a target within one percent,
        // means the inverter already does the right thing.
        if self.last_mode == Some(mode) {
            let target_close = self
                .last_target_percent
                .is_some_and(|prev| (prev - target).abs() <= HOLD_TOLERANCE_PERCENT);
            if mode != InverterMode::Hold || target_close {
                return None;
            }
            // Advisory hold-off between command rewrites.
            if let Some(issued) = self.last_issued_at {
                if now - issued < chrono::Duration::minutes(min_hold_minutes as i64) {
                    return None;
                }
            }
        }

        self.last_mode = Some(mode);
        self.last_target_percent = Some(target);
        self.last_issued_at = Some(now);

        Some(InverterCommand {
            mode: command_mode,
            soc_min_percent: target.round().clamp(0.0, 100.0) as u8,
        })
    }
}
