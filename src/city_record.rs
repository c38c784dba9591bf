//! Data model definitions for the city store.
//!
//! [`CityRecord`] is the only persisted entity. Every process that opens the
//! store (the app and the widget/intent runtime) serializes it with the same
//! camelCase field names, so the on-disk JSON is the shared schema:
//!
//! ```json
//! {
//!   "id": "5f0c6a52-2b1e-4c55-9a8e-8f3f0d7f6a11",
//!   "name": "Ankara",
//!   "country": "Türkiye",
//!   "temperature": 18.0,
//!   "condition": "Bulutlu",
//!   "humidity": 55,
//!   "windSpeed": 12.0,
//!   "lastUpdated": "2025-10-20T09:30:00Z",
//!   "isSelected": false
//! }
//! ```
//!
//! [`NewCity`] is the creation input coming from the add-city form. It carries
//! the form's bounds check in [`NewCity::validate`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_response::AppResponse;

/// Inclusive bounds for a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Temperature range the add-city form allows, in °C.
pub const CREATE_TEMPERATURE: Bounds = Bounds::new(-20.0, 50.0);
/// Humidity range the add-city form allows, in percent.
pub const CREATE_HUMIDITY: Bounds = Bounds::new(0.0, 100.0);
/// Wind speed range the add-city form allows, in km/h.
pub const CREATE_WIND_SPEED: Bounds = Bounds::new(0.0, 100.0);

/// A city with manually entered weather attributes.
///
/// # Field constraints
///
/// - `id` is assigned once by the store and never changes.
/// - `name` is not unique; lookups by name resolve to the first record in
///   insertion order.
/// - `condition` is free text. It is normally one of the
///   [`WeatherCondition`] labels but the store does not enforce that.
/// - At most one record in a store has `is_selected` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityRecord {
    pub id: Uuid,
    pub name: String,
    pub country: String,
    pub temperature: f64,
    pub condition: String,
    pub humidity: i32,
    pub wind_speed: f64,
    pub last_updated: DateTime<Utc>,
    pub is_selected: bool,
}

impl CityRecord {
    /// Materializes a new record from form input. The record is never
    /// selected at creation.
    pub fn create(input: NewCity, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: input.name,
            country: input.country,
            temperature: input.temperature,
            condition: input.condition,
            humidity: input.humidity,
            wind_speed: input.wind_speed,
            last_updated: now,
            is_selected: false,
        }
    }

    /// Parsed condition, if the stored label is a known one.
    pub fn weather_condition(&self) -> Option<WeatherCondition> {
        WeatherCondition::from_label(&self.condition)
    }

    /// Apparent temperature shown by the large widget.
    pub fn feels_like(&self) -> f64 {
        self.temperature - 2.0
    }
}

/// User-supplied fields for a city that does not exist yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewCity {
    pub name: String,
    pub country: String,
    pub temperature: f64,
    pub condition: String,
    pub humidity: i32,
    pub wind_speed: f64,
}

impl Default for NewCity {
    fn default() -> Self {
        Self {
            name: String::new(),
            country: "Türkiye".to_string(),
            temperature: 20.0,
            condition: WeatherCondition::Sunny.label().to_string(),
            humidity: 60,
            wind_speed: 10.0,
        }
    }
}

impl NewCity {
    /// Checks the add-city form rules: non-blank name and country, numbers
    /// inside the creation bounds.
    pub fn validate(&self) -> Result<(), AppResponse> {
        if self.name.trim().is_empty() {
            return Err(AppResponse::ValidationError("City name must not be empty".to_string()));
        }
        if self.country.trim().is_empty() {
            return Err(AppResponse::ValidationError("Country must not be empty".to_string()));
        }
        if !CREATE_TEMPERATURE.contains(self.temperature) {
            return Err(AppResponse::ValidationError(format!(
                "Temperature {} is outside [{}, {}]",
                self.temperature, CREATE_TEMPERATURE.min, CREATE_TEMPERATURE.max
            )));
        }
        if !CREATE_HUMIDITY.contains(f64::from(self.humidity)) {
            return Err(AppResponse::ValidationError(format!(
                "Humidity {} is outside [{}, {}]",
                self.humidity, CREATE_HUMIDITY.min, CREATE_HUMIDITY.max
            )));
        }
        if !CREATE_WIND_SPEED.contains(self.wind_speed) {
            return Err(AppResponse::ValidationError(format!(
                "Wind speed {} is outside [{}, {}]",
                self.wind_speed, CREATE_WIND_SPEED.min, CREATE_WIND_SPEED.max
            )));
        }
        Ok(())
    }
}

/// The fixed set of weather labels the app offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeatherCondition {
    Sunny,
    Cloudy,
    Rainy,
    Snowy,
    Stormy,
    Foggy,
    PartlyCloudy,
}

impl WeatherCondition {
    pub const ALL: [WeatherCondition; 7] = [
        WeatherCondition::Sunny,
        WeatherCondition::Cloudy,
        WeatherCondition::Rainy,
        WeatherCondition::Snowy,
        WeatherCondition::Stormy,
        WeatherCondition::Foggy,
        WeatherCondition::PartlyCloudy,
    ];

    /// Text stored in `CityRecord::condition`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sunny => "Güneşli",
            Self::Cloudy => "Bulutlu",
            Self::Rainy => "Yağmurlu",
            Self::Snowy => "Karlı",
            Self::Stormy => "Fırtınalı",
            Self::Foggy => "Sisli",
            Self::PartlyCloudy => "Parçalı Bulutlu",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Self::Sunny => "sunny",
            Self::Cloudy => "cloudy",
            Self::Rainy => "rainy",
            Self::Snowy => "snowy",
            Self::Stormy => "stormy",
            Self::Foggy => "foggy",
            Self::PartlyCloudy => "partly-cloudy",
        }
    }

    /// Accepts either the stored label or the slug.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label() == label || c.slug().eq_ignore_ascii_case(label))
    }

    /// SF Symbols name used by the host UI.
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Sunny => "sun.max.fill",
            Self::Cloudy => "cloud.fill",
            Self::Rainy => "cloud.rain.fill",
            Self::Snowy => "cloud.snow.fill",
            Self::Stormy => "cloud.bolt.fill",
            Self::Foggy => "cloud.fog.fill",
            Self::PartlyCloudy => "cloud.sun.fill",
        }
    }

    pub fn tint(&self) -> &'static str {
        match self {
            Self::Sunny => "orange",
            Self::Cloudy | Self::PartlyCloudy => "gray",
            Self::Rainy => "blue",
            Self::Snowy => "cyan",
            Self::Stormy => "purple",
            Self::Foggy => "secondary",
        }
    }
}

/// Icon for a free-text condition; unknown labels get the plain cloud.
pub fn icon_for_label(label: &str) -> &'static str {
    WeatherCondition::from_label(label)
        .map(|c| c.icon())
        .unwrap_or("cloud.fill")
}

/// Tint for a free-text condition; unknown labels get the primary color.
pub fn tint_for_label(label: &str) -> &'static str {
    WeatherCondition::from_label(label)
        .map(|c| c.tint())
        .unwrap_or("primary")
}
