pub mod awattar;
pub mod evcc;
pub mod normalize;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::domain::{EnergyPrice, PriceSlot};
use normalize::{normalize_prices, RawPricePoint};

/// Collected output of one day-ahead market provider.
#[derive(Debug, Default)]
pub struct MarketData {
    pub raw_prices: Vec<RawPricePoint>,
    /// Spot price for the current instant, when the provider reports one.
    pub snapshot_price: Option<EnergyPrice>,
}

/// A day-ahead market source. Implementations own their wire format and
/// surface `RawPricePoint`s; the core never sees HTTP.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn key(&self) -> &str;
    async fn collect(&self) -> Result<MarketData>;
}

/// Outcome of trying the configured providers in priority order.
#[derive(Debug, Default)]
pub struct PriceCollection {
    pub slots: Vec<PriceSlot>,
    pub provider: Option<String>,
    pub snapshot_price: Option<EnergyPrice>,
    pub warnings: Vec<String>,
}

/// Try providers in the given order; the first non-empty normalized series
/// wins. Transport failures become warnings, not errors.
pub async fn collect_prices(providers: &[Box<dyn MarketDataProvider>]) -> PriceCollection {
    let mut collection = PriceCollection::default();

    for provider in providers {
        match provider.collect().await {
            Ok(data) => {
                let slots = normalize_prices(data.raw_prices);
                if slots.is_empty() {
                    collection
                        .warnings
                        .push(format!("provider {} returned no usable slots", provider.key()));
                    continue;
                }
                collection.slots = slots;
                collection.provider = Some(provider.key().to_string());
                collection.snapshot_price = data.snapshot_price;
                return collection;
            }
            Err(e) => {
                warn!(provider = provider.key(), error = %e, "market data fetch failed");
                collection
                    .warnings
                    .push(format!("provider {} failed: {e:#}", provider.key()));
            }
        }
    }

    collection
}
