//! Widget snapshots and timelines.
//!
//! A [`Snapshot`] is derived purely from store state at the moment it is
//! taken. [`SnapshotProvider`] opens its own store connection for every
//! snapshot and keeps nothing between calls except the [`ReloadSignal`]
//! generation it last saw, so a timeline can only be stale until the next
//! cadence tick or the next intent-raised reload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::city_record::{icon_for_label, tint_for_label, CityRecord, WeatherCondition};
use crate::city_store::CityStore;
use crate::store_config::{default_cadence, StoreConfig};

/// What the widget should show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "city", rename_all = "camelCase")]
pub enum Snapshot {
    NoCities,
    NoSelection,
    Selected(CityRecord),
}

impl Snapshot {
    /// Fallback ladder over a full listing of the store.
    pub fn from_records(records: Vec<CityRecord>) -> Self {
        if records.is_empty() {
            return Snapshot::NoCities;
        }
        match records.into_iter().find(|r| r.is_selected) {
            Some(city) => Snapshot::Selected(city),
            None => Snapshot::NoSelection,
        }
    }

    pub fn city(&self) -> Option<&CityRecord> {
        match self {
            Snapshot::Selected(city) => Some(city),
            _ => None,
        }
    }
}

/// Implemented by whatever can tell the widget host to rebuild timelines.
pub trait TimelineReloader: Send + Sync {
    fn reload_timelines(&self);
}

/// In-process reload flag shared between intents and the provider.
#[derive(Debug, Default)]
pub struct ReloadSignal {
    generation: AtomicU64,
}

impl ReloadSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl TimelineReloader for ReloadSignal {
    fn reload_timelines(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Timeline reload requested (generation {})", generation);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub date: DateTime<Utc>,
    pub snapshot: Snapshot,
}

/// One-entry timeline plus the moment the host should ask again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub entries: Vec<TimelineEntry>,
    pub reload_after: DateTime<Utc>,
    pub generation: u64,
}

pub struct SnapshotProvider {
    config: StoreConfig,
    signal: Arc<ReloadSignal>,
}

impl SnapshotProvider {
    pub fn new(config: StoreConfig, signal: Arc<ReloadSignal>) -> Self {
        Self { config, signal }
    }

    /// Current snapshot. A store that cannot be opened or read shows as
    /// [`Snapshot::NoCities`].
    pub fn snapshot(&self) -> Snapshot {
        let store = match CityStore::init(&self.config) {
            Ok(store) => store,
            Err(e) => {
                warn!("Snapshot could not open the store: {e}");
                return Snapshot::NoCities;
            }
        };
        snapshot_of(&store)
    }

    /// One entry for `now`. `reload_after` falls back to the default cadence
    /// and finally to `now` itself if the sum would leave chrono's range.
    pub fn timeline(&self, now: DateTime<Utc>) -> Timeline {
        let generation = self.signal.generation();
        let snapshot = self.snapshot();
        let reload_after = now
            .checked_add_signed(self.config.timeline_cadence())
            .or_else(|| now.checked_add_signed(default_cadence()))
            .unwrap_or(now);
        Timeline {
            entries: vec![TimelineEntry { date: now, snapshot }],
            reload_after,
            generation,
        }
    }

    /// True once the cadence has elapsed or an intent asked for a reload
    /// after `timeline` was built.
    pub fn needs_reload(&self, timeline: &Timeline, now: DateTime<Utc>) -> bool {
        now >= timeline.reload_after || self.signal.generation() != timeline.generation
    }

    /// Sample shown in the widget gallery before any data exists.
    pub fn preview(now: DateTime<Utc>) -> TimelineEntry {
        TimelineEntry {
            date: now,
            snapshot: Snapshot::Selected(CityRecord {
                id: Uuid::nil(),
                name: "İstanbul".to_string(),
                country: "Türkiye".to_string(),
                temperature: 22.0,
                condition: WeatherCondition::Sunny.label().to_string(),
                humidity: 65,
                wind_speed: 15.0,
                last_updated: now,
                is_selected: true,
            }),
        }
    }
}

/// Snapshot over an already open store. Read failures degrade to
/// [`Snapshot::NoCities`].
pub fn snapshot_of(store: &CityStore) -> Snapshot {
    match store.list_all() {
        Ok(records) => Snapshot::from_records(records),
        Err(e) => {
            warn!("Snapshot could not read the store: {e}");
            Snapshot::NoCities
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetFamily {
    Small,
    Medium,
    Large,
}

impl WidgetFamily {
    /// Unknown names fall back to the small widget.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "medium" | "systemmedium" => WidgetFamily::Medium,
            "large" | "systemlarge" => WidgetFamily::Large,
            _ => WidgetFamily::Small,
        }
    }
}

/// The fields one widget size displays. Metrics beyond what the size shows
/// are left as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetContent {
    pub family: WidgetFamily,
    pub title: String,
    pub subtitle: String,
    pub temperature: Option<i64>,
    pub condition: Option<String>,
    pub icon: String,
    pub tint: String,
    pub humidity: Option<i32>,
    pub wind_speed: Option<i64>,
    pub feels_like: Option<i64>,
}

impl WidgetContent {
    pub fn render(snapshot: &Snapshot, family: WidgetFamily) -> Self {
        let city = match snapshot {
            Snapshot::Selected(city) => city,
            Snapshot::NoCities => {
                return Self::placeholder(family, "No cities", "Add a city in the app")
            }
            Snapshot::NoSelection => {
                return Self::placeholder(family, "Select a city", "Pick a city in the app")
            }
        };

        let detailed = matches!(family, WidgetFamily::Medium | WidgetFamily::Large);
        Self {
            family,
            title: city.name.clone(),
            subtitle: city.country.clone(),
            temperature: Some(city.temperature.trunc() as i64),
            condition: Some(city.condition.clone()),
            icon: icon_for_label(&city.condition).to_string(),
            tint: tint_for_label(&city.condition).to_string(),
            humidity: detailed.then_some(city.humidity),
            wind_speed: detailed.then_some(city.wind_speed.trunc() as i64),
            feels_like: (family == WidgetFamily::Large)
                .then_some(city.feels_like().trunc() as i64),
        }
    }

    fn placeholder(family: WidgetFamily, title: &str, subtitle: &str) -> Self {
        Self {
            family,
            title: title.to_string(),
            subtitle: subtitle.to_string(),
            temperature: None,
            condition: None,
            icon: WeatherCondition::Cloudy.icon().to_string(),
            tint: "secondary".to_string(),
            humidity: None,
            wind_speed: None,
            feels_like: None,
        }
    }
}
