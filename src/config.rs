use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::net::SocketAddr;
use validator::Validate;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_app_config"))]
pub struct AppConfig {
    #[validate(nested)]
    #[serde(default)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub battery: BatteryConfig,

    #[validate(nested)]
    #[serde(default)]
    pub price: PriceConfig,

    #[validate(nested)]
    #[serde(default)]
    pub logic: LogicConfig,

    #[validate(nested)]
    #[serde(default)]
    pub solar: SolarConfig,

    /// Day-ahead market providers, keyed by provider name. Each provider
    /// carries a unique priority; lower priorities are tried first.
    #[serde(default)]
    pub market_data: BTreeMap<String, MarketProviderConfig>,

    #[validate(nested)]
    #[serde(default)]
    pub evcc: EvccConfig,

    #[validate(nested)]
    #[serde(default)]
    pub inverter: InverterConfig,

    #[validate(nested)]
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    #[serde(default = "default_host")]
    pub host: String,

    #[validate(range(min = 1, max = 65535))]
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("Failed to parse socket address")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Battery configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BatteryConfig {
    /// Total usable capacity, must be positive.
    #[validate(range(min = 0.1, max = 1000.0))]
    pub capacity_kwh: f64,

    /// Grid-charge power cap. Zero disables grid charging.
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100_000.0))]
    pub max_charge_power_w: f64,

    /// PV-charge power cap. Unset defaults to whatever PV is available.
    #[serde(default)]
    pub max_charge_power_solar_w: Option<f64>,

    /// Discharge power cap. Unset means unlimited.
    #[serde(default)]
    pub max_discharge_power_w: Option<f64>,

    /// SoC floor enforced in auto mode (%).
    #[serde(default = "default_floor_soc")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub auto_mode_floor_soc: f64,

    /// Ceiling for routine charging (%).
    #[serde(default = "default_max_charge_soc")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub max_charge_soc_percent: f64,
}

/// Tariff configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PriceConfig {
    /// Network tariff added to every imported kWh.
    #[serde(default)]
    #[validate(range(min = 0.0, max = 10.0))]
    pub grid_fee_eur_per_kwh: f64,

    /// Paid for exported energy; negative values are floored at zero.
    #[serde(default)]
    pub feed_in_tariff_eur_per_kwh: f64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            grid_fee_eur_per_kwh: 0.0,
            feed_in_tariff_eur_per_kwh: 0.0,
        }
    }
}

/// Control loop policy
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LogicConfig {
    #[serde(default = "default_interval_seconds")]
    #[validate(range(min = 1, max = 86_400))]
    pub interval_seconds: u64,

    /// Advisory minimum time between command changes; consumed by the
    /// command translator, not the scheduler.
    #[serde(default)]
    pub min_hold_minutes: u64,

    #[serde(default = "default_house_load_w")]
    #[validate(range(min = 0.0, max = 100_000.0))]
    pub house_load_w: f64,

    /// When false, battery-origin export is forbidden; PV-only export is
    /// still allowed once the battery cannot absorb more PV in a slot.
    #[serde(default)]
    pub allow_battery_export: bool,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            min_hold_minutes: 0,
            house_load_w: default_house_load_w(),
            allow_battery_export: false,
        }
    }
}

/// PV configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SolarConfig {
    /// Fraction of PV generation consumed directly by the house.
    #[serde(default = "default_direct_use_ratio")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub direct_use_ratio: f64,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            direct_use_ratio: default_direct_use_ratio(),
        }
    }
}

/// One day-ahead market provider entry
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MarketProviderConfig {
    /// Providers are tried in ascending priority; priorities must be unique.
    pub priority: u32,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_market_timeout_ms")]
    pub timeout_ms: u64,
}

/// Home-energy-manager endpoint configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct EvccConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_market_timeout_ms")]
    pub timeout_ms: u64,
}

/// Inverter driver configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct InverterConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    #[serde(default = "default_inverter_timeout_s")]
    pub timeout_s: u64,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8085
}
fn default_floor_soc() -> f64 {
    5.0
}
fn default_max_charge_soc() -> f64 {
    100.0
}
fn default_interval_seconds() -> u64 {
    300
}
fn default_house_load_w() -> f64 {
    1200.0
}
fn default_direct_use_ratio() -> f64 {
    0.0
}
fn default_market_timeout_ms() -> u64 {
    15_000
}
fn default_verify_tls() -> bool {
    true
}
fn default_inverter_timeout_s() -> u64 {
    6
}
fn default_db_path() -> String {
    "chargepilot.db".to_string()
}

/// Cross-field checks that the derive-level ranges cannot express
fn validate_app_config(config: &AppConfig) -> Result<(), validator::ValidationError> {
    if config.battery.auto_mode_floor_soc > config.battery.max_charge_soc_percent {
        return Err(validator::ValidationError::new(
            "auto_mode_floor_soc must not exceed max_charge_soc_percent",
        ));
    }

    let mut seen = HashSet::new();
    for (name, provider) in &config.market_data {
        if !seen.insert(provider.priority) {
            let mut err = validator::ValidationError::new("duplicate market provider priority");
            err.add_param("provider".into(), name);
            return Err(err);
        }
    }

    if config.inverter.enabled {
        let complete = config.inverter.host.as_deref().is_some_and(|h| !h.is_empty())
            && config.inverter.user.as_deref().is_some_and(|u| !u.is_empty())
            && config.inverter.password.is_some();
        if !complete {
            return Err(validator::ValidationError::new(
                "inverter enabled but host/user/password incomplete",
            ));
        }
    }

    Ok(())
}

impl AppConfig {
    /// Load configuration from TOML and environment variables.
    ///
    /// Later sources override earlier ones:
    /// 1. `config/default.toml`
    /// 2. Environment variables with `CHARGEPILOT__` prefix
    ///    (`CHARGEPILOT__BATTERY__CAPACITY_KWH` -> `battery.capacity_kwh`)
    pub fn load() -> Result<Self> {
        Self::load_from(Figment::new().merge(Toml::file("config/default.toml")))
    }

    pub fn load_from(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .merge(Env::prefixed("CHARGEPILOT__").split("__"))
            .extract()
            .context("Failed to parse configuration")?;

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// Market providers ordered by ascending priority.
    pub fn providers_by_priority(&self) -> Vec<(&str, &MarketProviderConfig)> {
        let mut out: Vec<_> = self
            .market_data
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        out.sort_by_key(|(_, p)| p.priority);
        out
    }
}

/// Static policy inputs consumed by the scheduler and backtester,
/// derived once from the validated file configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub capacity_kwh: f64,
    pub grid_charge_power_w: f64,
    pub solar_charge_power_w: Option<f64>,
    pub discharge_power_w: Option<f64>,
    pub floor_soc_percent: f64,
    pub max_charge_soc_percent: f64,
    pub house_load_w: f64,
    pub grid_fee_eur_per_kwh: f64,
    pub feed_in_tariff_eur_per_kwh: f64,
    pub direct_use_ratio: f64,
    pub allow_battery_export: bool,
}

impl SimulationConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            capacity_kwh: cfg.battery.capacity_kwh,
            grid_charge_power_w: cfg.battery.max_charge_power_w,
            solar_charge_power_w: cfg.battery.max_charge_power_solar_w,
            discharge_power_w: cfg.battery.max_discharge_power_w,
            floor_soc_percent: cfg.battery.auto_mode_floor_soc,
            max_charge_soc_percent: cfg.battery.max_charge_soc_percent,
            house_load_w: cfg.logic.house_load_w,
            grid_fee_eur_per_kwh: cfg.price.grid_fee_eur_per_kwh,
            feed_in_tariff_eur_per_kwh: cfg.price.feed_in_tariff_eur_per_kwh.max(0.0),
            direct_use_ratio: cfg.solar.direct_use_ratio.clamp(0.0, 1.0),
            allow_battery_export: cfg.logic.allow_battery_export,
        }
    }
}
