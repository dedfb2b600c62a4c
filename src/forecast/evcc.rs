//! Home-energy-manager (EVCC) adapter.
//!
//! Three concerns against one endpoint: the grid tariff as a price source,
//! the live system state (battery SoC, grid/PV/home power), and the solar
//! production forecast timeseries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::domain::{EnergyPrice, LiveObservations, Percentage, Power, SolarSlot};

use super::normalize::{normalize_solar, RawPricePoint, RawSolarPoint};
use super::{MarketData, MarketDataProvider};

#[derive(Clone)]
pub struct EvccClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl EvccClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chargepilot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
            client,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(format!("{}{path}", self.base_url));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Current grid tariff series.
    pub async fn tariff(&self) -> Result<MarketData> {
        let resp = self
            .get("/api/tariff/grid")
            .send()
            .await
            .context("evcc tariff GET failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("evcc tariff error: HTTP {status}");
        }
        let body: TariffResponse = resp.json().await.context("evcc tariff JSON parse failed")?;

        Ok(MarketData {
            raw_prices: body
                .result
                .rates
                .into_iter()
                .map(|r| RawPricePoint {
                    start: r.start,
                    end: r.end,
                    // EVCC reports EUR/kWh; leave the unit explicit so the
                    // magnitude heuristic never touches these.
                    price: Some(r.price),
                    unit: Some("eur/kwh".to_string()),
                    ..Default::default()
                })
                .collect(),
            snapshot_price: None,
        })
    }

    /// Live observations plus the solar forecast from `/api/state`.
    pub async fn state(&self) -> Result<(LiveObservations, Vec<SolarSlot>)> {
        let resp = self
            .get("/api/state")
            .send()
            .await
            .context("evcc state GET failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("evcc state error: HTTP {status}");
        }
        let body: StateResponse = resp.json().await.context("evcc state JSON parse failed")?;
        let result = body.result;

        let observations = LiveObservations {
            battery_soc: result.battery_soc.map(Percentage::from_percent),
            grid_power: result
                .grid_power
                .or(result.grid.as_ref().and_then(|g| g.power))
                .map(Power::watts),
            solar_power: result.pv_power.map(Power::watts),
            home_power: result.home_power.map(Power::watts),
            snapshot_price: result.tariff_grid.map(EnergyPrice::eur_per_kwh),
            fetched_at: Some(Utc::now()),
        };

        let solar_raw: Vec<RawSolarPoint> = result
            .forecast
            .and_then(|f| f.solar)
            .map(|s| s.timeseries)
            .unwrap_or_default()
            .into_iter()
            .map(|p| RawSolarPoint {
                start: p.ts,
                end: None,
                value: Some(p.val),
                power_unit: Some("w".to_string()),
                ..Default::default()
            })
            .collect();

        Ok((observations, normalize_solar(solar_raw)))
    }
}

/// The tariff endpoint doubles as a price provider of its own.
pub struct EvccTariffProvider(pub EvccClient);

#[async_trait]
impl MarketDataProvider for EvccTariffProvider {
    fn key(&self) -> &str {
        "evcc"
    }

    async fn collect(&self) -> Result<MarketData> {
        self.0.tariff().await
    }
}

#[derive(Debug, Deserialize)]
struct TariffResponse {
    result: TariffResult,
}

#[derive(Debug, Deserialize)]
struct TariffResult {
    #[serde(default)]
    rates: Vec<TariffRate>,
}

#[derive(Debug, Deserialize)]
struct TariffRate {
    start: DateTime<Utc>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    price: f64,
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    result: StateResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateResult {
    #[serde(default)]
    battery_soc: Option<f64>,
    #[serde(default)]
    grid_power: Option<f64>,
    #[serde(default)]
    grid: Option<GridBlock>,
    #[serde(default)]
    pv_power: Option<f64>,
    #[serde(default)]
    home_power: Option<f64>,
    #[serde(default)]
    tariff_grid: Option<f64>,
    #[serde(default)]
    forecast: Option<ForecastBlock>,
}

#[derive(Debug, Deserialize)]
struct GridBlock {
    #[serde(default)]
    power: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ForecastBlock {
    #[serde(default)]
    solar: Option<SolarBlock>,
}

#[derive(Debug, Deserialize)]
struct SolarBlock {
    #[serde(default)]
    timeseries: Vec<SolarPoint>,
}

#[derive(Debug, Deserialize)]
struct SolarPoint {
    ts: DateTime<Utc>,
    val: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn tariff_rates_become_raw_prices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tariff/grid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {
                    "rates": [
                        {"start": "2026-03-05T10:00:00Z", "end": "2026-03-05T11:00:00Z", "price": 0.289},
                        {"start": "2026-03-05T11:00:00Z", "end": "2026-03-05T12:00:00Z", "price": 0.305}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = EvccClient::new(&server.uri(), None, Duration::from_secs(15)).unwrap();
        let data = client.tariff().await.unwrap();
        assert_eq!(data.raw_prices.len(), 2);
        assert_eq!(data.raw_prices[0].price, Some(0.289));
    }

    #[tokio::test]
    async fn state_yields_observations_and_solar_forecast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/state"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {
                    "batterySoc": 63.0,
                    "gridPower": -420.0,
                    "pvPower": 2150.0,
                    "homePower": 730.0,
                    "tariffGrid": 0.31,
                    "forecast": {
                        "solar": {
                            "timeseries": [
                                {"ts": "2026-03-05T10:00:00Z", "val": 1800.0},
                                {"ts": "2026-03-05T11:00:00Z", "val": 2400.0}
                            ]
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let client =
            EvccClient::new(&server.uri(), Some("sekrit"), Duration::from_secs(15)).unwrap();
        let (obs, solar) = client.state().await.unwrap();
        assert_eq!(obs.battery_soc.map(|p| p.as_percent()), Some(63.0));
        assert_eq!(obs.grid_power.map(|p| p.as_watts()), Some(-420.0));
        assert_eq!(solar.len(), 2);
        // 1800 W average over the default one-hour slot.
        assert!((solar[0].energy.as_watt_hours() - 1800.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unauthorized_state_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/state"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = EvccClient::new(&server.uri(), None, Duration::from_secs(15)).unwrap();
        assert!(client.state().await.is_err());
    }
}
