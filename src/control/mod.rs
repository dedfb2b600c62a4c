//! Periodic control cycle.
//!
//! Single-threaded cooperative driver: gather inputs, run the scheduler,
//! persist history and snapshot, reconcile the inverter, sleep. Exactly one
//! cycle is in flight; overlapping triggers are dropped with a warning.

pub mod command;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backtest::{compute_savings, BacktestOptions};
use crate::config::{AppConfig, SimulationConfig};
use crate::domain::{HistoryPoint, LiveObservations, SnapshotPayload, SolarSlot};
use crate::forecast::evcc::{EvccClient, EvccTariffProvider};
use crate::forecast::normalize::{
    assemble_eras, solar_energy_for, trim_price_slots, trim_solar_slots,
};
use crate::forecast::{awattar::AwattarProvider, collect_prices, MarketDataProvider};
use crate::inverter::InverterClient;
use crate::scheduler::{simulate, SchedulerError, SimulationOptions};
use crate::store::StateStore;

use command::CommandTranslator;

pub struct Controller {
    cfg: AppConfig,
    sim_config: SimulationConfig,
    store: Arc<StateStore>,
    providers: Vec<Box<dyn MarketDataProvider>>,
    evcc: Option<EvccClient>,
    inverter: Option<InverterClient>,
    translator: Mutex<CommandTranslator>,
    /// Single-flight guard; an overlapping trigger skips the cycle.
    busy: Mutex<()>,
}

impl Controller {
    pub fn new(cfg: AppConfig, store: Arc<StateStore>) -> Result<Self> {
        let sim_config = SimulationConfig::from_app(&cfg);

        let evcc = match (cfg.evcc.enabled, &cfg.evcc.base_url) {
            (true, Some(base_url)) => Some(
                EvccClient::new(
                    base_url,
                    cfg.evcc.token.as_deref(),
                    StdDuration::from_millis(cfg.evcc.timeout_ms),
                )
                .context("Failed to initialize EVCC client")?,
            ),
            (true, None) => anyhow::bail!("evcc enabled without base_url"),
            _ => None,
        };

        let mut providers: Vec<Box<dyn MarketDataProvider>> = Vec::new();
        for (name, provider_cfg) in cfg.providers_by_priority() {
            let timeout = StdDuration::from_millis(provider_cfg.timeout_ms);
            match name {
                "awattar" => providers.push(Box::new(
                    AwattarProvider::new(provider_cfg.base_url.as_deref(), timeout)
                        .context("Failed to initialize awattar provider")?,
                )),
                "evcc" => {
                    let client = match &evcc {
                        Some(client) => client.clone(),
                        None => {
                            let base_url = provider_cfg
                                .base_url
                                .as_deref()
                                .context("evcc market provider without base_url")?;
                            EvccClient::new(base_url, cfg.evcc.token.as_deref(), timeout)?
                        }
                    };
                    providers.push(Box::new(EvccTariffProvider(client)));
                }
                other => warn!(provider = other, "unknown market data provider, skipping"),
            }
        }

        let inverter = InverterClient::from_config(&cfg.inverter)?;

        Ok(Self {
            cfg,
            sim_config,
            store,
            providers,
            evcc,
            inverter,
            translator: Mutex::new(CommandTranslator::new()),
            busy: Mutex::new(()),
        })
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut interval = tokio::time::interval(StdDuration::from_secs(
            self.cfg.logic.interval_seconds.max(1),
        ));
        loop {
            interval.tick().await;
            let Ok(_guard) = self.busy.try_lock() else {
                warn!("previous control cycle still running, skipping tick");
                continue;
            };
            if let Err(e) = self.run_cycle(Utc::now()).await {
                error!(error = %e, "control cycle failed");
            }
        }
    }

    /// One full control cycle at the injected instant.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<()> {
        let mut warnings: Vec<String> = Vec::new();

        // Gather inputs.
        let mut collection = collect_prices(&self.providers).await;
        warnings.append(&mut collection.warnings);

        let (observations, solar_slots) = match &self.evcc {
            Some(client) => match client.state().await {
                Ok(result) => result,
                Err(e) => {
                    warnings.push(format!("evcc state unavailable: {e:#}"));
                    (LiveObservations::default(), Vec::new())
                }
            },
            None => (LiveObservations::default(), Vec::new()),
        };

        // Trim everything to [now, inf) with the in-progress slot shortened.
        let price_slots = trim_price_slots(collection.slots, now);
        let solar_slots = trim_solar_slots(solar_slots, now);

        let previous_snapshot = self.store.latest_snapshot().unwrap_or_default();
        let live_soc = match observations.battery_soc {
            Some(soc) => Some(soc.as_percent()),
            None => {
                let fallback = previous_snapshot.as_ref().and_then(|s| s.current_soc_percent);
                if fallback.is_some() {
                    warnings.push("live SoC unavailable, using last snapshot".to_string());
                }
                fallback
            }
        };

        let mut snapshot = SnapshotPayload::empty(now);
        snapshot.current_soc_percent = live_soc;
        snapshot.warnings = warnings;

        let current_price = price_slots
            .first()
            .map(|s| s.price.as_eur_per_kwh())
            .or(observations.snapshot_price.map(|p| p.as_eur_per_kwh()))
            .or(collection.snapshot_price.map(|p| p.as_eur_per_kwh()));

        let history_point = self.observe_interval(now, live_soc, current_price, &observations, &solar_slots);

        let mut dispatch = true;
        match (live_soc, price_slots.is_empty()) {
            (None, _) => {
                snapshot
                    .errors
                    .push("no battery SoC available from EVCC or prior snapshot".to_string());
                dispatch = false;
            }
            (_, true) => {
                snapshot
                    .errors
                    .push("no price forecast available from any provider".to_string());
                dispatch = false;
            }
            (Some(soc), false) => {
                let mut price_slots = price_slots;
                let provider = collection.provider.as_deref().unwrap_or("unknown");
                snapshot.eras =
                    assemble_eras(&mut price_slots, provider, None, &solar_slots, "evcc");

                let solar_energies: Vec<f64> = price_slots
                    .iter()
                    .map(|s| solar_energy_for(&s.slot, &solar_slots).as_kilowatt_hours())
                    .collect();

                match simulate(
                    &self.sim_config,
                    soc,
                    &price_slots,
                    &solar_energies,
                    SimulationOptions::default(),
                    now,
                ) {
                    Ok(output) => {
                        // Second pass with grid charging off prices the
                        // "basic battery" comparison.
                        let basic = simulate(
                            &self.sim_config,
                            soc,
                            &price_slots,
                            &solar_energies,
                            SimulationOptions {
                                allow_grid_charge: false,
                            },
                            now,
                        )
                        .map(|o| o.projected_cost_eur)
                        .ok();

                        snapshot.next_step_soc_percent = Some(output.next_step_soc_percent);
                        snapshot.recommended_soc_percent =
                            Some(output.recommended_soc_percent);
                        snapshot.projected_cost_eur = Some(output.projected_cost_eur);
                        snapshot.baseline_cost_eur = Some(output.baseline_cost_eur);
                        snapshot.projected_savings_eur = Some(output.projected_savings_eur);
                        snapshot.basic_battery_cost_eur = basic;
                        snapshot.projected_grid_power_w =
                            Some(output.projected_grid_power_w);
                        snapshot.average_price_eur_per_kwh =
                            Some(output.average_price_eur_per_kwh);
                        snapshot.forecast_hours = output.forecast_hours;
                        snapshot.forecast_samples = output.forecast_samples;
                        snapshot.oracle_entries = output.oracle_entries;
                    }
                    Err(e @ SchedulerError::InvalidConfig(_)) => {
                        // Arithmetic infeasibility: record, keep the prior
                        // snapshot in place, skip dispatch.
                        error!(error = %e, "scheduler infeasible, keeping previous snapshot");
                        self.store.append_history(&history_point)?;
                        return Ok(());
                    }
                    Err(e) => {
                        snapshot.errors.push(e.to_string());
                        dispatch = false;
                    }
                }
            }
        }

        // Backtest over the recent window plus the just-observed interval.
        let window_hours = 24.0;
        let since = now - Duration::hours(2 * window_hours as i64);
        let mut history = self.store.history_since(since).unwrap_or_default();
        history.push(history_point.clone());
        let backtest = compute_savings(
            &self.sim_config,
            &history,
            &BacktestOptions {
                window_hours,
                reference_timestamp: Some(now),
                import_price_fallback_eur_per_kwh: current_price,
                end_valuation_price_eur_per_kwh: current_price,
            },
        );
        let savings = backtest.map(|b| b.savings_eur);
        snapshot.backtested_savings_eur = savings;

        let mut history_point = history_point;
        history_point.backtested_savings_eur = savings;

        // History append precedes snapshot replace so a concurrent reader
        // never sees a snapshot referencing an invisible history row.
        self.store.append_history(&history_point)?;
        self.store.replace_snapshot(&snapshot)?;

        if dispatch {
            self.reconcile_inverter(&mut snapshot, now).await?;
        }

        info!(
            soc_percent = snapshot.current_soc_percent,
            next_step = snapshot.next_step_soc_percent,
            recommended = snapshot.recommended_soc_percent,
            projected_savings_eur = snapshot.projected_savings_eur,
            backtested_savings_eur = snapshot.backtested_savings_eur,
            warnings = snapshot.warnings.len(),
            "control tick"
        );
        Ok(())
    }

    fn observe_interval(
        &self,
        now: DateTime<Utc>,
        soc: Option<f64>,
        price: Option<f64>,
        observations: &LiveObservations,
        solar_slots: &[SolarSlot],
    ) -> HistoryPoint {
        let mut point = HistoryPoint::at(now);
        point.battery_soc_percent = soc;
        point.price_eur_per_kwh = price;
        point.price_ct_per_kwh = price.map(|p| p * 100.0);
        point.grid_power_w = observations.grid_power.map(|p| p.as_watts());
        point.solar_power_w = observations.solar_power.map(|p| p.as_watts());
        point.home_power_w = observations.home_power.map(|p| p.as_watts());
        // Expected PV energy over the upcoming control interval.
        let interval_end = now + Duration::seconds(self.cfg.logic.interval_seconds as i64);
        let upcoming = crate::domain::TimeSlot::new(now, interval_end);
        let energy = solar_energy_for(&upcoming, solar_slots);
        if energy.as_watt_hours() > 0.0 {
            point.solar_energy_wh = Some(energy.as_watt_hours());
        }
        point
    }

    async fn reconcile_inverter(
        &self,
        snapshot: &mut SnapshotPayload,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let command = self.translator.lock().await.translate(
            snapshot,
            &self.sim_config,
            now,
            self.cfg.logic.min_hold_minutes,
        );
        let Some(command) = command else {
            debug!("inverter already reconciled, no command issued");
            return Ok(());
        };

        snapshot.applied_target_soc_percent = Some(command.soc_min_percent as f64);
        match &self.inverter {
            Some(client) => {
                if let Err(e) = client.send_command(&command).await {
                    // Dispatch errors land on the already-persisted snapshot.
                    snapshot.errors.push(format!("inverter command failed: {e:#}"));
                    self.store.replace_snapshot(snapshot)?;
                    warn!(error = %e, "inverter command failed");
                } else {
                    info!(
                        mode = ?command.mode,
                        soc_min_percent = command.soc_min_percent,
                        "inverter command applied"
                    );
                }
            }
            None => {
                debug!(
                    mode = ?command.mode,
                    soc_min_percent = command.soc_min_percent,
                    "inverter driver disabled, command not sent"
                );
            }
        }
        Ok(())
    }
}
