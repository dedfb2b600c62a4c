//! Finite-horizon dynamic program over discretized battery SoC states.
//!
//! A backward pass computes the cost-to-go on a dense `(H+1) x (N+1)` grid,
//! storing the chosen SoC-step delta per cell. The forward rollout follows
//! those deltas from the live SoC and applies an opportunistic correction
//! that absorbs otherwise-exported PV into remaining battery headroom.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;

use crate::config::SimulationConfig;
use crate::domain::{OracleEntry, PriceSlot, Strategy};
use crate::physics::{SlotPhysics, CHARGE_EPS_KWH, ENERGY_EPS, HOLD_EPS_KWH};

use super::types::{SchedulerError, SimulationOptions, SimulationOutput};

/// Number of SoC steps; the state space is `0..=SOC_STEPS` at 1% per step.
pub const SOC_STEPS: usize = 100;

/// Energy flows implied by moving from state `i` to state `j` within a slot.
#[derive(Debug, Clone, Copy)]
struct Flows {
    delta_kwh: f64,
    grid_energy_kwh: f64,
    /// Grid import exceeding the baseline import, i.e. energy pulled from
    /// the grid specifically to charge the battery.
    additional_grid_kwh: f64,
    solar_charging_kwh: f64,
}

struct Grid<'a> {
    config: &'a SimulationConfig,
    physics: Vec<SlotPhysics>,
    energy_per_step_kwh: f64,
    min_step: usize,
    max_step: usize,
}

impl<'a> Grid<'a> {
    fn new(
        config: &'a SimulationConfig,
        slots: &[PriceSlot],
        solar_energies_kwh: &[f64],
        options: SimulationOptions,
    ) -> Result<Self, SchedulerError> {
        if config.capacity_kwh <= 0.0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "battery capacity must be positive, got {} kWh",
                config.capacity_kwh
            )));
        }
        if slots.is_empty() {
            return Err(SchedulerError::EmptyForecast);
        }

        let physics: Vec<SlotPhysics> = slots
            .iter()
            .enumerate()
            .map(|(h, slot)| {
                SlotPhysics::derive(
                    config,
                    slot.slot.duration_hours(),
                    slot.price.as_eur_per_kwh(),
                    solar_energies_kwh.get(h).copied().unwrap_or(0.0),
                    options.allow_grid_charge,
                )
            })
            .collect();

        let total_hours: f64 = physics.iter().map(|p| p.duration_hours).sum();
        if total_hours <= 0.0 {
            return Err(SchedulerError::InvalidConfig(
                "forecast horizon has zero duration".to_string(),
            ));
        }

        let percent_step = 100.0 / SOC_STEPS as f64;
        let mut min_step =
            (config.floor_soc_percent / percent_step - ENERGY_EPS).ceil().max(0.0) as usize;
        let max_step = ((config.max_charge_soc_percent / percent_step).round() as usize)
            .min(SOC_STEPS);
        if min_step > max_step {
            min_step = max_step;
        }

        Ok(Self {
            config,
            physics,
            energy_per_step_kwh: config.capacity_kwh / SOC_STEPS as f64,
            min_step,
            max_step,
        })
    }

    fn percent_of(&self, step: usize) -> f64 {
        step as f64 * 100.0 / SOC_STEPS as f64
    }

    fn flows(&self, phys: &SlotPhysics, i: usize, j: usize) -> Flows {
        let delta_kwh = (j as f64 - i as f64) * self.energy_per_step_kwh;
        let grid_energy_kwh = phys.load_after_direct_kwh + delta_kwh - phys.available_solar_kwh;
        let additional_grid_kwh = if delta_kwh > 0.0 {
            (grid_energy_kwh.max(0.0) - phys.baseline_grid_import_kwh).max(0.0)
        } else {
            0.0
        };
        Flows {
            delta_kwh,
            grid_energy_kwh,
            additional_grid_kwh,
            solar_charging_kwh: (delta_kwh - additional_grid_kwh).max(0.0),
        }
    }

    /// Feasibility filters for the transition `i -> j`, in gate order.
    /// Returns the implied flows when the transition is admissible.
    fn admit(&self, phys: &SlotPhysics, i: usize, j: usize) -> Option<Flows> {
        let flows = self.flows(phys, i, j);

        // Floor.
        if j < self.min_step {
            return None;
        }

        // PV-export gate: while the battery still had solar-charge headroom,
        // exporting instead of charging is not admissible.
        if flows.grid_energy_kwh < 0.0 {
            let headroom_kwh = (SOC_STEPS - i) as f64 * self.energy_per_step_kwh;
            let required = (phys.available_solar_kwh - phys.load_after_direct_kwh)
                .min(phys.solar_charge_limit_kwh)
                .min(headroom_kwh);
            if required > 0.0 && flows.delta_kwh + ENERGY_EPS < required {
                return None;
            }
        }

        // Battery-export ban: PV-only export stays allowed.
        if !self.config.allow_battery_export
            && flows.grid_energy_kwh < phys.baseline_grid_energy_kwh.min(0.0) - ENERGY_EPS
        {
            return None;
        }

        // Charge-source split.
        if flows.delta_kwh > 0.0 {
            if flows.additional_grid_kwh > phys.grid_charge_limit_kwh + ENERGY_EPS {
                return None;
            }
            let pv_coverable = flows
                .delta_kwh
                .min(phys.solar_charge_limit_kwh)
                .min(phys.available_solar_kwh);
            if flows.additional_grid_kwh > (flows.delta_kwh - pv_coverable).max(0.0) + ENERGY_EPS {
                return None;
            }
            // Above the routine ceiling only PV charging is admitted.
            if j > self.max_step && flows.additional_grid_kwh > ENERGY_EPS {
                return None;
            }
            if flows.solar_charging_kwh > phys.solar_charge_limit_kwh + ENERGY_EPS {
                return None;
            }
        }

        Some(flows)
    }

    fn charge_steps_available(&self, phys: &SlotPhysics, i: usize) -> usize {
        let budget_kwh = phys.grid_charge_limit_kwh + phys.solar_charge_limit_kwh;
        if budget_kwh <= ENERGY_EPS {
            return 0;
        }
        let by_budget = (budget_kwh / self.energy_per_step_kwh + ENERGY_EPS).floor() as usize;
        by_budget.min(SOC_STEPS - i)
    }

    fn discharge_steps_available(&self, phys: &SlotPhysics, i: usize) -> usize {
        let by_floor = i.saturating_sub(self.min_step);
        if phys.discharge_limit_kwh.is_infinite() {
            return by_floor;
        }
        let by_cap =
            (phys.discharge_limit_kwh / self.energy_per_step_kwh + ENERGY_EPS).floor() as usize;
        by_floor.min(by_cap)
    }
}

/// Run the scheduler over an ordered, normalized horizon.
///
/// `solar_energies_kwh` is aligned with `slots`; missing entries count as
/// zero PV. `timestamp` is injected so identical inputs give identical
/// outputs.
pub fn simulate(
    config: &SimulationConfig,
    initial_soc_percent: f64,
    slots: &[PriceSlot],
    solar_energies_kwh: &[f64],
    options: SimulationOptions,
    timestamp: DateTime<Utc>,
) -> Result<SimulationOutput, SchedulerError> {
    let grid = Grid::new(config, slots, solar_energies_kwh, options)?;
    let horizon = grid.physics.len();
    let states = SOC_STEPS + 1;

    let total_hours: f64 = grid.physics.iter().map(|p| p.duration_hours).sum();
    let avg_price_total: f64 = grid
        .physics
        .iter()
        .map(|p| p.price_total_eur_per_kwh * p.duration_hours)
        .sum::<f64>()
        / total_hours;
    let avg_market_price: f64 = grid
        .physics
        .iter()
        .map(|p| p.price_eur_per_kwh * p.duration_hours)
        .sum::<f64>()
        / total_hours;

    // Backward pass. The terminal row values residual stored energy at the
    // horizon-average import price so the optimizer is indifferent to
    // leaving energy in the battery at that price.
    let mut cost_to_go = vec![0.0f64; states];
    for (i, cell) in cost_to_go.iter_mut().enumerate() {
        *cell = -avg_price_total * i as f64 * grid.energy_per_step_kwh;
    }
    let mut chosen_delta = vec![vec![0i32; states]; horizon];

    for h in (0..horizon).rev() {
        let phys = &grid.physics[h];
        let mut row = vec![0.0f64; states];
        for i in 0..states {
            let up = grid.charge_steps_available(phys, i) as i64;
            let down = grid.discharge_steps_available(phys, i) as i64;

            // First minimum in enumeration order; ties keep the most
            // negative delta.
            let best = (-down..=up)
                .filter_map(|delta| {
                    let j = (i as i64 + delta) as usize;
                    let flows = grid.admit(phys, i, j)?;
                    let cost = phys.slot_cost(flows.grid_energy_kwh) + cost_to_go[j];
                    Some((cost, delta as i32))
                })
                .min_by_key(|(cost, _)| OrderedFloat(*cost));

            // States below the floor can be transition-free when the slot has
            // no charge budget; holding is the only physical option there.
            let (cost, delta) = best.unwrap_or_else(|| {
                (
                    phys.slot_cost(phys.baseline_grid_energy_kwh) + cost_to_go[i],
                    0,
                )
            });
            row[i] = cost;
            chosen_delta[h][i] = delta;
        }
        cost_to_go = row;
    }

    // Forward rollout.
    let percent_step = 100.0 / SOC_STEPS as f64;
    let start_step = ((initial_soc_percent / percent_step).round() as i64)
        .clamp(0, SOC_STEPS as i64) as usize;

    let mut i = start_step;
    let mut cost_total = 0.0f64;
    let mut baseline_cost = 0.0f64;
    let mut grid_energy_total = 0.0f64;
    let mut grid_charge_total = 0.0f64;
    let mut entries = Vec::with_capacity(horizon);

    for (h, slot) in slots.iter().enumerate() {
        let phys = &grid.physics[h];
        let delta = chosen_delta[h][i] as i64;
        let mut j = ((i as i64 + delta).clamp(0, SOC_STEPS as i64)) as usize;
        let mut flows = grid.flows(phys, i, j);

        // Opportunistic PV absorption: soak otherwise-exported PV into the
        // remaining headroom, one step at a time.
        while flows.grid_energy_kwh < -ENERGY_EPS
            && j < SOC_STEPS
            && flows.solar_charging_kwh + grid.energy_per_step_kwh
                <= phys.solar_charge_limit_kwh + ENERGY_EPS
        {
            j += 1;
            flows = grid.flows(phys, i, j);
        }
        if j < grid.min_step {
            j = grid.min_step;
            flows = grid.flows(phys, i, j);
        }

        cost_total += phys.slot_cost(flows.grid_energy_kwh);
        baseline_cost += phys.slot_cost(phys.baseline_grid_energy_kwh);
        grid_charge_total += flows.additional_grid_kwh;

        let reported_grid_kwh = if flows.grid_energy_kwh.abs() < CHARGE_EPS_KWH {
            0.0
        } else {
            flows.grid_energy_kwh
        };
        grid_energy_total += reported_grid_kwh;

        let strategy = if flows.additional_grid_kwh > CHARGE_EPS_KWH {
            Strategy::Charge
        } else if flows.delta_kwh.abs() <= HOLD_EPS_KWH {
            Strategy::Hold
        } else {
            Strategy::Auto
        };

        entries.push(OracleEntry {
            era_id: slot
                .era_id
                .clone()
                .unwrap_or_else(|| format!("era-{}", slot.slot.start.timestamp())),
            start: slot.slot.start,
            end: slot.slot.end,
            start_soc_percent: grid.percent_of(i),
            end_soc_percent: grid.percent_of(j),
            target_soc_percent: grid.percent_of(j),
            grid_energy_wh: reported_grid_kwh * 1000.0,
            strategy,
        });

        i = j;
    }

    // Cancel the terminal inventory valuation on both sides so absolute
    // magnitudes stay meaningful while the difference is preserved.
    let inventory_eur = avg_price_total * i as f64 * grid.energy_per_step_kwh;
    cost_total -= inventory_eur;
    baseline_cost -= inventory_eur;

    let floor = config.floor_soc_percent;
    let ceiling = config.max_charge_soc_percent;
    let last_end = entries.last().map(|e| e.end_soc_percent).unwrap_or(0.0);
    let recommended = if grid_charge_total > CHARGE_EPS_KWH {
        ceiling
    } else {
        last_end
    }
    .clamp(floor, ceiling);
    let next_step = entries
        .first()
        .map(|e| e.end_soc_percent)
        .unwrap_or(0.0)
        .max(floor);

    Ok(SimulationOutput {
        timestamp,
        initial_soc_percent: grid.percent_of(start_step),
        next_step_soc_percent: next_step,
        recommended_soc_percent: recommended,
        projected_cost_eur: cost_total,
        baseline_cost_eur: baseline_cost,
        projected_savings_eur: baseline_cost - cost_total,
        projected_grid_power_w: grid_energy_total / total_hours * 1000.0,
        average_price_eur_per_kwh: avg_market_price,
        forecast_hours: total_hours,
        forecast_samples: horizon,
        oracle_entries: entries,
    })
}
