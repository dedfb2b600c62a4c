//! Awattar day-ahead market adapter.
//!
//! `GET {base}/v1/marketdata` returns hourly EPEX spot prices in EUR/MWh.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use super::normalize::RawPricePoint;
use super::{MarketData, MarketDataProvider};

pub const DEFAULT_BASE_URL: &str = "https://api.awattar.at";

pub struct AwattarProvider {
    base_url: String,
    client: reqwest::Client,
}

impl AwattarProvider {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chargepilot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl MarketDataProvider for AwattarProvider {
    fn key(&self) -> &str {
        "awattar"
    }

    async fn collect(&self) -> Result<MarketData> {
        let url = format!("{}/v1/marketdata", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("awattar GET failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("awattar API error: HTTP {status}");
        }
        let body: AwattarResponse = resp.json().await.context("awattar JSON parse failed")?;

        let raw_prices = body
            .data
            .into_iter()
            .filter_map(|e| {
                let start = DateTime::<Utc>::from_timestamp_millis(e.start_timestamp)?;
                let end = DateTime::<Utc>::from_timestamp_millis(e.end_timestamp)?;
                Some(RawPricePoint {
                    start,
                    end: Some(end),
                    price: Some(e.marketprice),
                    unit: Some(e.unit.unwrap_or_else(|| "Eur/MWh".to_string())),
                    ..Default::default()
                })
            })
            .collect();

        Ok(MarketData {
            raw_prices,
            snapshot_price: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AwattarResponse {
    data: Vec<AwattarEntry>,
}

#[derive(Debug, Deserialize)]
struct AwattarEntry {
    start_timestamp: i64,
    end_timestamp: i64,
    marketprice: f64,
    unit: Option<String>,
}
