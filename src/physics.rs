//! Physical model of a single tariff slot.
//!
//! Pure derivations shared by the scheduler's dynamic program and the
//! backtester's baseline replay: direct PV use, residual load, available PV,
//! baseline grid energy, and per-slot charge/discharge energy caps.

use crate::config::SimulationConfig;

/// Tolerance for energy comparisons (kWh).
pub const ENERGY_EPS: f64 = 1e-9;

/// Grid-energy magnitudes below this are reported as zero (kWh).
pub const CHARGE_EPS_KWH: f64 = 0.05;

/// SoC deltas below this count as holding (kWh).
pub const HOLD_EPS_KWH: f64 = 0.02;

/// Derived per-slot quantities. All energies in kWh, prices in EUR/kWh.
#[derive(Debug, Clone)]
pub struct SlotPhysics {
    pub duration_hours: f64,
    /// Market price for the slot, before the network tariff.
    pub price_eur_per_kwh: f64,
    /// Import price including the network tariff; only paid on imports.
    pub price_total_eur_per_kwh: f64,
    pub feed_in_eur_per_kwh: f64,
    pub load_energy_kwh: f64,
    pub direct_use_kwh: f64,
    pub load_after_direct_kwh: f64,
    pub available_solar_kwh: f64,
    /// Grid energy with an idle battery; negative means PV-only export.
    pub baseline_grid_energy_kwh: f64,
    pub baseline_grid_import_kwh: f64,
    pub grid_charge_limit_kwh: f64,
    pub solar_charge_limit_kwh: f64,
    /// `f64::INFINITY` when discharge is uncapped.
    pub discharge_limit_kwh: f64,
}

impl SlotPhysics {
    pub fn derive(
        config: &SimulationConfig,
        duration_hours: f64,
        price_eur_per_kwh: f64,
        solar_energy_kwh: f64,
        allow_grid_charge: bool,
    ) -> Self {
        let solar = solar_energy_kwh.max(0.0);
        let load_energy_kwh = config.house_load_w * duration_hours / 1000.0;
        let direct_use_kwh = load_energy_kwh.min(config.direct_use_ratio * solar);
        let load_after_direct_kwh = load_energy_kwh - direct_use_kwh;
        let available_solar_kwh = (solar - direct_use_kwh).max(0.0);
        let baseline_grid_energy_kwh = load_after_direct_kwh - available_solar_kwh;

        let grid_charge_limit_kwh = if allow_grid_charge {
            config.grid_charge_power_w * duration_hours / 1000.0
        } else {
            0.0
        };
        // An unset PV cap means the battery may absorb whatever PV is left.
        let solar_charge_limit_kwh = match config.solar_charge_power_w {
            Some(cap_w) => available_solar_kwh.min(cap_w * duration_hours / 1000.0),
            None => available_solar_kwh,
        };
        let discharge_limit_kwh = match config.discharge_power_w {
            Some(cap_w) => cap_w * duration_hours / 1000.0,
            None => f64::INFINITY,
        };

        Self {
            duration_hours,
            price_eur_per_kwh,
            price_total_eur_per_kwh: price_eur_per_kwh + config.grid_fee_eur_per_kwh,
            feed_in_eur_per_kwh: config.feed_in_tariff_eur_per_kwh.max(0.0),
            load_energy_kwh,
            direct_use_kwh,
            load_after_direct_kwh,
            available_solar_kwh,
            baseline_grid_energy_kwh,
            baseline_grid_import_kwh: baseline_grid_energy_kwh.max(0.0),
            grid_charge_limit_kwh,
            solar_charge_limit_kwh,
            discharge_limit_kwh,
        }
    }

    /// Cost of the given signed grid energy: imports pay the fee-inclusive
    /// price, exports earn the feed-in tariff.
    pub fn slot_cost(&self, grid_energy_kwh: f64) -> f64 {
        if grid_energy_kwh >= 0.0 {
            grid_energy_kwh * self.price_total_eur_per_kwh
        } else {
            grid_energy_kwh * self.feed_in_eur_per_kwh
        }
    }
}
