//! End-to-end scheduler and backtester scenarios, plus property-based
//! invariants over randomized configurations and horizons.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rstest::rstest;

use chargepilot::backtest::{compute_savings, BacktestOptions};
use chargepilot::config::SimulationConfig;
use chargepilot::domain::{
    Energy, EnergyPrice, HistoryPoint, PriceSlot, SolarSlot, Strategy as PlanStrategy, TimeSlot,
};
use chargepilot::forecast::normalize::{trim_price_slots, trim_solar_slots};
use chargepilot::physics::SlotPhysics;
use chargepilot::scheduler::{simulate, SimulationOptions};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

fn hourly_slots(prices: &[f64]) -> Vec<PriceSlot> {
    prices
        .iter()
        .enumerate()
        .map(|(h, p)| {
            PriceSlot::new(
                TimeSlot::new(
                    base_time() + Duration::hours(h as i64),
                    base_time() + Duration::hours(h as i64 + 1),
                ),
                EnergyPrice::eur_per_kwh(*p),
            )
        })
        .collect()
}

fn config() -> SimulationConfig {
    SimulationConfig {
        capacity_kwh: 10.0,
        grid_charge_power_w: 3500.0,
        solar_charge_power_w: None,
        discharge_power_w: None,
        floor_soc_percent: 10.0,
        max_charge_soc_percent: 100.0,
        house_load_w: 1500.0,
        grid_fee_eur_per_kwh: 0.0,
        feed_in_tariff_eur_per_kwh: 0.0,
        direct_use_ratio: 0.0,
        allow_battery_export: false,
    }
}

// --- Scenario: grid-charge decision at a cheap slot -------------------------

#[test]
fn cheap_slot_triggers_grid_charge() {
    let slots = hourly_slots(&[0.08, 0.38]);
    let out = simulate(&config(), 40.0, &slots, &[], SimulationOptions::default(), base_time())
        .expect("simulation");

    let first = &out.oracle_entries[0];
    assert_eq!(first.strategy, PlanStrategy::Charge);
    assert!(first.end_soc_percent > 40.0);
    assert!(first.grid_energy_wh > 0.0);
    assert!((out.next_step_soc_percent - first.end_soc_percent).abs() < 1e-9);
}

// --- Scenario: opportunistic PV absorption ----------------------------------

#[test]
fn surplus_pv_is_absorbed_not_exported() {
    let mut cfg = config();
    cfg.grid_charge_power_w = 0.0;
    cfg.solar_charge_power_w = Some(4500.0);
    cfg.direct_use_ratio = 0.2;
    cfg.house_load_w = 1000.0;

    let slots = hourly_slots(&[0.32, 0.35]);
    let solar = [1.8, 0.2];
    let out = simulate(&cfg, 80.0, &slots, &solar, SimulationOptions::default(), base_time())
        .expect("simulation");

    let first = &out.oracle_entries[0];
    assert!(matches!(first.strategy, PlanStrategy::Auto | PlanStrategy::Hold));
    assert!(first.grid_energy_wh <= 0.0);
    assert_eq!(out.next_step_soc_percent, first.end_soc_percent);
}

// --- Scenario: export forbidden ---------------------------------------------

#[test]
fn export_ban_preserves_pre_positioning() {
    let mut cfg = config();
    cfg.solar_charge_power_w = Some(4500.0);
    cfg.house_load_w = 2200.0;
    cfg.direct_use_ratio = 0.6;
    cfg.grid_fee_eur_per_kwh = 0.11;
    cfg.allow_battery_export = false;

    let slots = hourly_slots(&[0.02, 0.48, 0.45]);
    let out = simulate(&cfg, 40.0, &slots, &[], SimulationOptions::default(), base_time())
        .expect("simulation");

    assert_eq!(out.oracle_entries[0].strategy, PlanStrategy::Charge);
    for (entry, slot) in out.oracle_entries.iter().zip(&slots) {
        let phys = SlotPhysics::derive(
            &cfg,
            slot.slot.duration_hours(),
            slot.price.as_eur_per_kwh(),
            0.0,
            true,
        );
        let floor_wh = phys.baseline_grid_energy_kwh.min(0.0) * 1000.0;
        assert!(
            entry.grid_energy_wh >= floor_wh - 1e-3,
            "battery-origin export at {}",
            entry.era_id
        );
    }
}

// --- Scenarios: horizon trimming --------------------------------------------

#[rstest]
#[case(30, 0.5)]
#[case(45, 0.25)]
#[case(0, 1.0)]
fn ongoing_price_slot_is_shortened(#[case] minutes_in: i64, #[case] expected_hours: f64) {
    let start = base_time() + Duration::hours(12);
    let slots = vec![PriceSlot::new(
        TimeSlot::new(start, start + Duration::hours(1)),
        EnergyPrice::eur_per_kwh(0.25),
    )];
    let now = start + Duration::minutes(minutes_in);

    let trimmed = trim_price_slots(slots, now);
    assert_eq!(trimmed.len(), 1);
    assert_eq!(trimmed[0].slot.start, now);
    assert!((trimmed[0].slot.duration_hours() - expected_hours).abs() < 1e-12);
    assert!((trimmed[0].price.as_eur_per_kwh() - 0.25).abs() < 1e-12);
}

#[rstest]
#[case(30, 0.5)]
#[case(15, 0.75)]
fn ongoing_solar_slot_is_prorated(#[case] minutes_in: i64, #[case] expected_kwh: f64) {
    let start = base_time() + Duration::hours(12);
    let slots = vec![SolarSlot::new(
        TimeSlot::new(start, start + Duration::hours(1)),
        Energy::kilowatt_hours(1.0),
    )];
    let now = start + Duration::minutes(minutes_in);

    let trimmed = trim_solar_slots(slots, now);
    assert_eq!(trimmed.len(), 1);
    assert!((trimmed[0].energy.as_kilowatt_hours() - expected_kwh).abs() < 1e-12);
}

// --- Scenario: backtest monotone --------------------------------------------

fn history_point(hour: i64, soc: f64, grid_w: f64, price: f64) -> HistoryPoint {
    let mut p = HistoryPoint::at(base_time() + Duration::hours(hour));
    p.battery_soc_percent = Some(soc);
    p.grid_power_w = Some(grid_w);
    p.solar_power_w = Some(0.0);
    p.price_eur_per_kwh = Some(price);
    p
}

#[test]
fn flat_history_with_both_batteries_at_floor_nets_zero() {
    // Both sit at the floor SoC; neither can discharge, both import the same
    // load at the same price.
    let history: Vec<HistoryPoint> =
        (0..6).map(|h| history_point(h, 10.0, 1500.0, 0.30)).collect();
    let opts = BacktestOptions {
        end_valuation_price_eur_per_kwh: Some(0.30),
        ..Default::default()
    };
    let result = compute_savings(&config(), &history, &opts).expect("result");
    assert!((result.actual_cost_eur - result.dumb_cost_eur).abs() < 1e-9);
    assert!(result.savings_eur.abs() < 1e-9);
}

#[test]
fn injected_cheap_import_pays_off_by_the_price_differential() {
    // Hour 1 is cheap: smart imports 2 kWh extra (SoC 10 -> 30) on top of the
    // 1.5 kW load; dumb does not. The window ends at 0.40 EUR/kWh.
    let mut history = vec![
        history_point(0, 10.0, 1500.0, 0.40),
        history_point(1, 10.0, 3500.0, 0.10),
        history_point(2, 30.0, 1500.0, 0.40),
        history_point(3, 30.0, 1500.0, 0.40),
    ];
    history[1].battery_soc_percent = Some(10.0);
    let opts = BacktestOptions {
        end_valuation_price_eur_per_kwh: Some(0.40),
        ..Default::default()
    };
    let result = compute_savings(&config(), &history, &opts).expect("result");

    // 2 kWh moved from 0.10 to a 0.40 valuation.
    let expected = 2.0 * (0.40 - 0.10);
    assert!(
        (result.savings_eur - expected).abs() < 1e-9,
        "savings {} != {}",
        result.savings_eur,
        expected
    );
}

#[test]
fn appending_history_extends_the_interval_count() {
    let mut history: Vec<HistoryPoint> =
        (0..5).map(|h| history_point(h, 50.0, 1500.0, 0.30)).collect();
    let opts = |reference: DateTime<Utc>| BacktestOptions {
        reference_timestamp: Some(reference),
        ..Default::default()
    };

    let before = compute_savings(&config(), &history, &opts(history[4].timestamp))
        .expect("before")
        .interval_count;
    history.push(history_point(5, 50.0, 1500.0, 0.30));
    let after = compute_savings(&config(), &history, &opts(history[5].timestamp))
        .expect("after")
        .interval_count;
    assert_eq!(after, before + 1);
}

// --- Property-based invariants ----------------------------------------------

#[derive(Debug, Clone)]
struct Scenario {
    config: SimulationConfig,
    prices: Vec<f64>,
    solar: Vec<f64>,
    initial_soc: f64,
}

fn scenario_strategy() -> impl Strategy<Value = Scenario> {
    (
        (
            4.0f64..20.0,
            0u32..30,
            70u32..=100,
            0.0f64..5000.0,
            proptest::option::of(500.0f64..5000.0),
            proptest::option::of(500.0f64..5000.0),
            0.0f64..3000.0,
            0.0f64..0.15,
            0.0f64..0.049,
        ),
        (
            0.0f64..1.0,
            any::<bool>(),
            proptest::collection::vec((0.05f64..0.6, 0.0f64..3.0), 1..12),
            0.0f64..1.0,
        ),
    )
        .prop_map(
            |(
                (
                    capacity,
                    floor,
                    ceiling,
                    grid_charge,
                    solar_charge,
                    discharge,
                    house_load,
                    fee,
                    feed_in,
                ),
                (direct_ratio, allow_export, slots, soc_fraction),
            )| {
                let floor = floor as f64;
                let ceiling = ceiling as f64;
                let config = SimulationConfig {
                    capacity_kwh: capacity,
                    grid_charge_power_w: grid_charge,
                    solar_charge_power_w: solar_charge,
                    discharge_power_w: discharge,
                    floor_soc_percent: floor,
                    max_charge_soc_percent: ceiling,
                    house_load_w: house_load,
                    grid_fee_eur_per_kwh: fee,
                    feed_in_tariff_eur_per_kwh: feed_in,
                    direct_use_ratio: direct_ratio,
                    allow_battery_export: allow_export,
                };
                let (prices, solar): (Vec<f64>, Vec<f64>) = slots.into_iter().unzip();
                let initial_soc = floor + (100.0 - floor) * soc_fraction;
                Scenario {
                    config,
                    prices,
                    solar,
                    initial_soc,
                }
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn soc_path_is_consistent_and_bounded(scenario in scenario_strategy()) {
        let slots = hourly_slots(&scenario.prices);
        let out = simulate(
            &scenario.config,
            scenario.initial_soc,
            &slots,
            &scenario.solar,
            SimulationOptions::default(),
            base_time(),
        )
        .unwrap();

        prop_assert_eq!(out.initial_soc_percent, out.oracle_entries[0].start_soc_percent);
        for pair in out.oracle_entries.windows(2) {
            prop_assert_eq!(pair[0].end_soc_percent, pair[1].start_soc_percent);
        }
        for entry in &out.oracle_entries {
            prop_assert!(entry.start_soc_percent >= scenario.config.floor_soc_percent - 1e-9);
            prop_assert!(entry.end_soc_percent >= scenario.config.floor_soc_percent - 1e-9);
            prop_assert!(entry.end_soc_percent <= 100.0 + 1e-9);
        }
    }

    #[test]
    fn optimized_cost_never_exceeds_idle_baseline(scenario in scenario_strategy()) {
        let slots = hourly_slots(&scenario.prices);
        let out = simulate(
            &scenario.config,
            scenario.initial_soc,
            &slots,
            &scenario.solar,
            SimulationOptions::default(),
            base_time(),
        )
        .unwrap();

        // Both reported costs subtract the inventory value of the PLANNED
        // final SoC. Re-shift the baseline to its own final inventory (the
        // idle battery stays at the initial SoC) before comparing: the idle
        // policy is feasible, so the optimizer can never do worse than it.
        let avg_total = out.average_price_eur_per_kwh
            + scenario.config.grid_fee_eur_per_kwh;
        let final_soc = out.oracle_entries.last().unwrap().end_soc_percent;
        let inventory_delta = avg_total
            * (final_soc - out.initial_soc_percent)
            * scenario.config.capacity_kwh
            / 100.0;
        prop_assert!(
            out.projected_cost_eur <= out.baseline_cost_eur + inventory_delta + 1e-6,
            "projected {} vs idle-valued baseline {}",
            out.projected_cost_eur,
            out.baseline_cost_eur + inventory_delta
        );
    }

    #[test]
    fn no_battery_export_when_disallowed(scenario in scenario_strategy()) {
        let mut config = scenario.config.clone();
        config.allow_battery_export = false;
        let slots = hourly_slots(&scenario.prices);
        let out = simulate(
            &config,
            scenario.initial_soc,
            &slots,
            &scenario.solar,
            SimulationOptions::default(),
            base_time(),
        )
        .unwrap();

        for (h, entry) in out.oracle_entries.iter().enumerate() {
            let phys = SlotPhysics::derive(
                &config,
                slots[h].slot.duration_hours(),
                scenario.prices[h],
                scenario.solar[h],
                true,
            );
            let floor_wh = phys.baseline_grid_energy_kwh.min(0.0) * 1000.0;
            prop_assert!(entry.grid_energy_wh >= floor_wh - 1e-3);
        }
    }

    #[test]
    fn charge_increments_respect_power_caps(scenario in scenario_strategy()) {
        let slots = hourly_slots(&scenario.prices);
        let out = simulate(
            &scenario.config,
            scenario.initial_soc,
            &slots,
            &scenario.solar,
            SimulationOptions::default(),
            base_time(),
        )
        .unwrap();

        for (h, entry) in out.oracle_entries.iter().enumerate() {
            let charged_kwh = (entry.end_soc_percent - entry.start_soc_percent).max(0.0)
                / 100.0
                * scenario.config.capacity_kwh;
            let phys = SlotPhysics::derive(
                &scenario.config,
                slots[h].slot.duration_hours(),
                scenario.prices[h],
                scenario.solar[h],
                true,
            );
            prop_assert!(
                charged_kwh <= phys.grid_charge_limit_kwh + phys.solar_charge_limit_kwh + 1e-6
            );
        }
    }

    #[test]
    fn outputs_are_deterministic(scenario in scenario_strategy()) {
        let slots = hourly_slots(&scenario.prices);
        let run = || {
            simulate(
                &scenario.config,
                scenario.initial_soc,
                &slots,
                &scenario.solar,
                SimulationOptions::default(),
                base_time(),
            )
            .unwrap()
        };
        let a = serde_json::to_string(&run()).unwrap();
        let b = serde_json::to_string(&run()).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn backtest_is_idempotent(soc in 10.0f64..90.0, price in 0.05f64..0.5) {
        let history: Vec<HistoryPoint> = (0..6)
            .map(|h| history_point(h, soc, 1200.0, price))
            .collect();
        let opts = BacktestOptions {
            reference_timestamp: Some(history[5].timestamp),
            ..Default::default()
        };
        let a = compute_savings(&config(), &history, &opts).unwrap();
        let b = compute_savings(&config(), &history, &opts).unwrap();
        prop_assert_eq!(a.savings_eur, b.savings_eur);
        prop_assert_eq!(a.interval_count, b.interval_count);
    }
}
