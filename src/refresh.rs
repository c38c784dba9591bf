//! Weather refresh.
//!
//! Nothing is fetched: a [`WeatherSource`] produces new metric values and the
//! refresh overwrites temperature, humidity and wind speed with them. The
//! default source draws uniformly from [`RefreshRanges`]. A real provider can
//! implement the same trait without touching the store or the intents.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use rand::Rng;
use uuid::Uuid;

use crate::app_response::AppResponse;
use crate::city_record::{Bounds, CityRecord};
use crate::city_store::CityStore;

/// Ranges a refresh draws from. These are narrower than the add-city form
/// bounds and stay separate from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshRanges {
    pub temperature: Bounds,
    pub humidity: (i32, i32),
    pub wind_speed: Bounds,
}

impl Default for RefreshRanges {
    fn default() -> Self {
        Self {
            temperature: Bounds::new(-10.0, 40.0),
            humidity: (30, 90),
            wind_speed: Bounds::new(0.0, 50.0),
        }
    }
}

impl RefreshRanges {
    /// Same ranges with reversed ends swapped. A bound that is not finite,
    /// or too wide to sample, is replaced by its default.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        let (low, high) = self.humidity;
        Self {
            temperature: ordered(self.temperature, defaults.temperature),
            humidity: (low.min(high), low.max(high)),
            wind_speed: ordered(self.wind_speed, defaults.wind_speed),
        }
    }
}

fn ordered(bounds: Bounds, fallback: Bounds) -> Bounds {
    if !(bounds.max - bounds.min).is_finite() {
        warn!("Unusable refresh range {bounds:?}; using {fallback:?}");
        return fallback;
    }
    Bounds::new(bounds.min.min(bounds.max), bounds.min.max(bounds.max))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherSample {
    pub temperature: f64,
    pub humidity: i32,
    pub wind_speed: f64,
}

/// Supplies fresh values for one city.
pub trait WeatherSource {
    fn sample(&mut self, city: &CityRecord, ranges: &RefreshRanges) -> WeatherSample;
}

/// Uniform random values inside the ranges.
#[derive(Debug, Default)]
pub struct SimulatedWeather<R = rand::rngs::ThreadRng> {
    rng: R,
}

impl SimulatedWeather {
    pub fn new() -> Self {
        Self { rng: rand::thread_rng() }
    }
}

impl<R: Rng> SimulatedWeather<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> WeatherSource for SimulatedWeather<R> {
    fn sample(&mut self, _city: &CityRecord, ranges: &RefreshRanges) -> WeatherSample {
        let ranges = ranges.normalized();
        WeatherSample {
            temperature: self
                .rng
                .gen_range(ranges.temperature.min..=ranges.temperature.max),
            humidity: self.rng.gen_range(ranges.humidity.0..=ranges.humidity.1),
            wind_speed: self
                .rng
                .gen_range(ranges.wind_speed.min..=ranges.wind_speed.max),
        }
    }
}

/// `now`, or one microsecond past `previous` when the clock has not moved
/// (or went backwards) since the last update.
fn next_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Returns `record` with new metrics and a later `last_updated`. Identity,
/// name, country, condition and selection are left alone.
pub fn refresh_one(
    record: &CityRecord,
    source: &mut dyn WeatherSource,
    ranges: &RefreshRanges,
) -> CityRecord {
    let sample = source.sample(record, ranges);
    CityRecord {
        temperature: sample.temperature,
        humidity: sample.humidity,
        wind_speed: sample.wind_speed,
        last_updated: next_timestamp(record.last_updated, Utc::now()),
        ..record.clone()
    }
}

/// Refreshes every record in one commit. Returns how many were refreshed.
pub fn refresh_all(
    store: &CityStore,
    source: &mut dyn WeatherSource,
    ranges: &RefreshRanges,
) -> Result<usize, AppResponse> {
    store.transact(|records| {
        for record in records.iter_mut() {
            *record = refresh_one(record, source, ranges);
        }
        debug!("Refreshed {} city record(s)", records.len());
        records.len()
    })
}

/// Refreshes a single city. `Ok(None)` when it no longer exists.
pub fn refresh_city(
    store: &CityStore,
    id: &Uuid,
    source: &mut dyn WeatherSource,
    ranges: &RefreshRanges,
) -> Result<Option<CityRecord>, AppResponse> {
    store.transact(|records| {
        let target = records.iter_mut().find(|r| r.id == *id)?;
        *target = refresh_one(target, source, ranges);
        Some(target.clone())
    })
}

/// Refreshes whichever city is selected. Storage failures are logged and
/// reported as "nothing refreshed".
pub fn refresh_selected(
    store: &CityStore,
    source: &mut dyn WeatherSource,
    ranges: &RefreshRanges,
) -> Option<CityRecord> {
    let result = store.transact(|records| {
        let target = records.iter_mut().find(|r| r.is_selected)?;
        *target = refresh_one(target, source, ranges);
        Some(target.clone())
    });
    match result {
        Ok(refreshed) => refreshed,
        Err(e) => {
            warn!("Refreshing the selected city failed: {e}");
            None
        }
    }
}
