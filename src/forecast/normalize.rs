//! Normalization of heterogeneous provider output onto the common time grid.
//!
//! Adapters hand over wire-shaped rows with ambiguous units and optional
//! fields; everything downstream of this module carries domain values only.

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;

use crate::domain::{
    Energy, EnergyPrice, ForecastEra, ForecastSource, Power, PriceSlot, SolarSlot, TimeSlot,
};

/// Price row as delivered by a provider adapter.
#[derive(Debug, Clone, Default)]
pub struct RawPricePoint {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub price: Option<f64>,
    pub unit: Option<String>,
    pub price_ct_per_kwh: Option<f64>,
    pub duration_hours: Option<f64>,
    pub duration_minutes: Option<f64>,
}

/// Solar row as delivered by a provider adapter.
#[derive(Debug, Clone, Default)]
pub struct RawSolarPoint {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub energy_wh: Option<f64>,
    pub energy_kwh: Option<f64>,
    pub value: Option<f64>,
    pub power_unit: Option<String>,
}

/// Resolve a raw price into EUR/kWh. Explicit ct fields and unit strings win;
/// an unlabeled magnitude above 10 is taken as ct/kWh.
pub fn resolve_price(raw: &RawPricePoint) -> Option<EnergyPrice> {
    if let Some(ct) = raw.price_ct_per_kwh {
        return Some(EnergyPrice::ct_per_kwh(ct));
    }
    let value = raw.price?;
    if !value.is_finite() {
        return None;
    }
    match raw.unit.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("eur/kwh") => Some(EnergyPrice::eur_per_kwh(value)),
        Some("ct/kwh") => Some(EnergyPrice::ct_per_kwh(value)),
        Some("eur/mwh") => Some(EnergyPrice::eur_per_kwh(value / 1000.0)),
        _ if value.abs() > 10.0 => Some(EnergyPrice::ct_per_kwh(value)),
        _ => Some(EnergyPrice::eur_per_kwh(value)),
    }
}

fn resolve_end(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    duration_hours: Option<f64>,
    duration_minutes: Option<f64>,
) -> DateTime<Utc> {
    end.or_else(|| {
        duration_hours
            .map(|h| Duration::milliseconds((h * 3_600_000.0) as i64))
            .or_else(|| duration_minutes.map(|m| Duration::milliseconds((m * 60_000.0) as i64)))
            .map(|d| start + d)
    })
    .unwrap_or(start + Duration::hours(1))
}

/// Sort ascending, drop degenerate slots, and deduplicate equal start times
/// by keeping the lower price.
pub fn normalize_prices(raw: Vec<RawPricePoint>) -> Vec<PriceSlot> {
    raw.into_iter()
        .filter_map(|r| {
            let price = resolve_price(&r)?;
            let end = resolve_end(r.start, r.end, r.duration_hours, r.duration_minutes);
            let slot = TimeSlot::new(r.start, end);
            slot.is_valid().then(|| PriceSlot::new(slot, price))
        })
        .sorted_by_key(|s| s.slot.start)
        .coalesce(|a, b| {
            if a.slot.start == b.slot.start {
                Ok(if b.price < a.price { b } else { a })
            } else {
                Err((a, b))
            }
        })
        .collect()
}

pub fn normalize_solar(raw: Vec<RawSolarPoint>) -> Vec<SolarSlot> {
    raw.into_iter()
        .filter_map(|r| {
            let end = resolve_end(r.start, r.end, None, None);
            let slot = TimeSlot::new(r.start, end);
            if !slot.is_valid() {
                return None;
            }
            let energy_wh = r
                .energy_wh
                .or(r.energy_kwh.map(|kwh| Energy::kilowatt_hours(kwh).as_watt_hours()))
                .or_else(|| {
                    let value = r.value?;
                    let power = match r.power_unit.as_deref().map(str::to_ascii_lowercase).as_deref()
                    {
                        Some("kw") => Power::kilowatts(value),
                        // A bare value is an average power in Watts.
                        Some("w") | None => Power::watts(value),
                        Some(_) => return None,
                    };
                    Some(power.for_duration(slot.duration()).as_watt_hours())
                })?;
            if !energy_wh.is_finite() {
                return None;
            }
            Some(SolarSlot::new(slot, Energy::watt_hours(energy_wh)))
        })
        .sorted_by_key(|s| s.slot.start)
        .dedup_by(|a, b| a.slot.start == b.slot.start)
        .collect()
}

/// Restrict price slots to `[now, inf)`, shortening an in-progress slot so
/// its start becomes `now`.
pub fn trim_price_slots(slots: Vec<PriceSlot>, now: DateTime<Utc>) -> Vec<PriceSlot> {
    slots
        .into_iter()
        .filter(|s| s.slot.end > now)
        .map(|mut s| {
            if s.slot.start < now {
                s.slot.start = now;
            }
            s
        })
        .collect()
}

/// Restrict solar slots to `[now, inf)`, pro-rating the energy of an
/// in-progress slot to its remaining fraction.
pub fn trim_solar_slots(slots: Vec<SolarSlot>, now: DateTime<Utc>) -> Vec<SolarSlot> {
    slots
        .into_iter()
        .filter(|s| s.slot.end > now)
        .map(|s| {
            if s.slot.start >= now {
                return s;
            }
            let full_hours = s.slot.duration_hours();
            let remaining = TimeSlot::new(now, s.slot.end);
            let fraction = if full_hours > 0.0 {
                remaining.duration_hours() / full_hours
            } else {
                0.0
            };
            SolarSlot::new(
                remaining,
                Energy::watt_hours(s.energy.as_watt_hours() * fraction),
            )
        })
        .collect()
}

/// Solar energy overlapping `slot`, pro-rated by overlap fraction.
pub fn solar_energy_for(slot: &TimeSlot, solar: &[SolarSlot]) -> Energy {
    let mut total = Energy::default();
    for s in solar {
        let overlap_start = slot.start.max(s.slot.start);
        let overlap_end = slot.end.min(s.slot.end);
        if overlap_end <= overlap_start {
            continue;
        }
        let overlap_hours = (overlap_end - overlap_start).num_milliseconds() as f64 / 3_600_000.0;
        let full_hours = s.slot.duration_hours();
        if full_hours > 0.0 {
            total = total
                + Energy::watt_hours(s.energy.as_watt_hours() * overlap_hours / full_hours);
        }
    }
    total
}

/// Join price and solar series onto the price grid. Each era carries at most
/// two cost sources (primary first) and one solar source per provider.
pub fn assemble_eras(
    price_slots: &mut [PriceSlot],
    price_provider: &str,
    secondary_prices: Option<(&str, &[PriceSlot])>,
    solar_slots: &[SolarSlot],
    solar_provider: &str,
) -> Vec<ForecastEra> {
    price_slots
        .iter_mut()
        .map(|price_slot| {
            let era_id = format!("era-{}", price_slot.slot.start.timestamp());
            price_slot.era_id = Some(era_id.clone());

            let mut sources = vec![ForecastSource::Cost {
                provider: price_provider.to_string(),
                price: price_slot.price,
            }];
            if let Some((name, series)) = secondary_prices {
                if let Some(other) = series
                    .iter()
                    .find(|s| s.slot.contains(price_slot.slot.start))
                {
                    sources.push(ForecastSource::Cost {
                        provider: name.to_string(),
                        price: other.price,
                    });
                }
            }

            let solar = solar_energy_for(&price_slot.slot, solar_slots);
            if solar.as_watt_hours() > 0.0 {
                sources.push(ForecastSource::Solar {
                    provider: solar_provider.to_string(),
                    energy: solar,
                });
            }

            ForecastEra {
                era_id,
                slot: price_slot.slot,
                sources,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 5, h, m, 0).unwrap()
    }

    #[test]
    fn unlabeled_magnitudes_above_ten_are_cents() {
        let raw = RawPricePoint {
            start: at(0, 0),
            price: Some(32.0),
            ..Default::default()
        };
        assert!((resolve_price(&raw).unwrap().as_eur_per_kwh() - 0.32).abs() < 1e-12);

        let raw = RawPricePoint {
            start: at(0, 0),
            price: Some(0.32),
            ..Default::default()
        };
        assert!((resolve_price(&raw).unwrap().as_eur_per_kwh() - 0.32).abs() < 1e-12);
    }

    #[test]
    fn explicit_units_override_the_magnitude_rule() {
        let raw = RawPricePoint {
            start: at(0, 0),
            price: Some(85.0),
            unit: Some("Eur/MWh".to_string()),
            ..Default::default()
        };
        assert!((resolve_price(&raw).unwrap().as_eur_per_kwh() - 0.085).abs() < 1e-12);
    }

    #[test]
    fn duplicate_starts_keep_the_lower_price() {
        let raws = vec![
            RawPricePoint {
                start: at(1, 0),
                price: Some(0.40),
                unit: Some("eur/kwh".to_string()),
                ..Default::default()
            },
            RawPricePoint {
                start: at(1, 0),
                price: Some(0.35),
                unit: Some("eur/kwh".to_string()),
                ..Default::default()
            },
            RawPricePoint {
                start: at(0, 0),
                price: Some(0.20),
                unit: Some("eur/kwh".to_string()),
                ..Default::default()
            },
        ];
        let slots = normalize_prices(raws);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].slot.start, at(0, 0));
        assert!((slots[1].price.as_eur_per_kwh() - 0.35).abs() < 1e-12);
    }

    #[test]
    fn missing_end_defaults_to_one_hour() {
        let slots = normalize_prices(vec![RawPricePoint {
            start: at(12, 0),
            price: Some(0.25),
            ..Default::default()
        }]);
        assert_eq!(slots[0].slot.end, at(13, 0));
    }

    #[test]
    fn trim_shortens_the_slot_in_progress() {
        let slots = vec![PriceSlot::new(
            TimeSlot::new(at(12, 0), at(13, 0)),
            EnergyPrice::eur_per_kwh(0.25),
        )];
        let trimmed = trim_price_slots(slots, at(12, 30));
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].slot.start, at(12, 30));
        assert!((trimmed[0].slot.duration_hours() - 0.5).abs() < 1e-12);
        assert!((trimmed[0].price.as_eur_per_kwh() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn trim_prorates_solar_energy() {
        let slots = vec![SolarSlot::new(
            TimeSlot::new(at(12, 0), at(13, 0)),
            Energy::kilowatt_hours(1.0),
        )];
        let trimmed = trim_solar_slots(slots, at(12, 30));
        assert_eq!(trimmed.len(), 1);
        assert!((trimmed[0].energy.as_kilowatt_hours() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn expired_slots_are_dropped() {
        let slots = vec![
            PriceSlot::new(TimeSlot::new(at(10, 0), at(11, 0)), EnergyPrice::eur_per_kwh(0.2)),
            PriceSlot::new(TimeSlot::new(at(11, 0), at(12, 0)), EnergyPrice::eur_per_kwh(0.3)),
        ];
        let trimmed = trim_price_slots(slots, at(11, 0));
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].slot.start, at(11, 0));
    }

    #[test]
    fn solar_overlap_is_prorated_onto_the_price_grid() {
        let solar = vec![SolarSlot::new(
            TimeSlot::new(at(12, 0), at(14, 0)),
            Energy::kilowatt_hours(2.0),
        )];
        let era_slot = TimeSlot::new(at(12, 0), at(13, 0));
        let energy = solar_energy_for(&era_slot, &solar);
        assert!((energy.as_kilowatt_hours() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn eras_carry_typed_sources() {
        let mut prices = vec![PriceSlot::new(
            TimeSlot::new(at(12, 0), at(13, 0)),
            EnergyPrice::eur_per_kwh(0.25),
        )];
        let solar = vec![SolarSlot::new(
            TimeSlot::new(at(12, 0), at(13, 0)),
            Energy::kilowatt_hours(1.5),
        )];
        let eras = assemble_eras(&mut prices, "awattar", None, &solar, "evcc");
        assert_eq!(eras.len(), 1);
        assert_eq!(eras[0].sources.iter().filter(|s| s.is_cost()).count(), 1);
        assert_eq!(eras[0].sources.iter().filter(|s| s.is_solar()).count(), 1);
        assert_eq!(prices[0].era_id.as_deref(), Some(eras[0].era_id.as_str()));
        assert!((eras[0].solar_energy().as_kilowatt_hours() - 1.5).abs() < 1e-12);
    }
}
