use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::SourceId;

/// A place the pipeline queries. Loaded once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// NWS forecast zone, e.g. `VAZ022`. Only used for zone-mode alert queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_zone: Option<String>,
}

impl Location {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            forecast_zone: None,
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.forecast_zone = Some(zone.into());
        self
    }

    pub fn has_valid_coordinates(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Outcome of a successful call through the fetcher.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub payload: serde_json::Value,
    /// 1-based number of the attempt that succeeded.
    pub attempts: u32,
    /// When the first attempt started.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock span of the whole retry loop.
    pub duration: Duration,
}

impl FetchResult {
    pub fn provenance(&self) -> Provenance {
        Provenance {
            attempts: self.attempts,
            fetched_at: self.timestamp,
            duration_secs: self.duration.as_secs_f64(),
        }
    }
}

/// Fetch metadata copied onto every normalized row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Provenance {
    pub attempts: u32,
    pub fetched_at: DateTime<Utc>,
    pub duration_secs: f64,
}

/// Current conditions for one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherRecord {
    pub location: String,
    pub lat: f64,
    pub lon: f64,
    pub timezone: Option<String>,
    pub timezone_offset: Option<i64>,
    pub dt: i64,
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub dew_point: Option<f64>,
    pub uvi: Option<f64>,
    pub clouds: Option<f64>,
    pub visibility: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_deg: Option<f64>,
    pub wind_gust: Option<f64>,
    pub rain_1h: Option<f64>,
    pub snow_1h: Option<f64>,
    pub weather_id: i64,
    pub weather_main: String,
    pub weather_description: String,
    pub weather_icon: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// Pollutant readings for one input location. Measurement fields are `None`
/// when upstream returned nothing for the location's coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirQualityRecord {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub forecast_zone: Option<String>,
    pub time: Option<i64>,
    pub interval: Option<i64>,
    pub elevation: Option<f64>,
    pub us_aqi: Option<f64>,
    pub pm10: Option<f64>,
    pub pm2_5: Option<f64>,
    pub carbon_monoxide: Option<f64>,
    pub nitrogen_dioxide: Option<f64>,
    pub sulphur_dioxide: Option<f64>,
    pub ozone: Option<f64>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl AirQualityRecord {
    pub fn has_measurements(&self) -> bool {
        [
            self.us_aqi,
            self.pm10,
            self.pm2_5,
            self.carbon_monoxide,
            self.nitrogen_dioxide,
            self.sulphur_dioxide,
            self.ozone,
        ]
        .iter()
        .any(Option::is_some)
    }
}

/// One active alert feature. Upstream omits fields freely, so nearly
/// everything is optional.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    /// Zone id or `lat,lon` point the alert was queried with.
    pub query: String,
    pub id: Option<String>,
    pub event: Option<String>,
    pub headline: Option<String>,
    pub area_desc: Option<String>,
    pub severity: Option<String>,
    pub certainty: Option<String>,
    pub urgency: Option<String>,
    pub status: Option<String>,
    pub message_type: Option<String>,
    pub category: Option<String>,
    pub sent: Option<String>,
    pub effective: Option<String>,
    pub onset: Option<String>,
    pub expires: Option<String>,
    pub ends: Option<String>,
    pub sender_name: Option<String>,
    pub description: Option<String>,
    pub instruction: Option<String>,
    pub response: Option<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// Whether a location's alert query produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Query succeeded; `alert` is `None` only when nothing is active.
    Ok,
    /// Query failed and was skipped; `alert` is always `None`.
    Failed,
}

/// A location left-joined with one of its alerts, or with none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertView {
    #[serde(flatten)]
    pub location: Location,
    pub alert_status: AlertStatus,
    pub alert: Option<AlertRecord>,
}

/// A location or key whose contribution was dropped from a table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source: SourceId,
    pub key: String,
    pub error: String,
}

/// Rows from one source across all queried locations, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedTable<T> {
    pub rows: Vec<T>,
    pub failures: Vec<SourceFailure>,
}

impl<T> Default for ConsolidatedTable<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> ConsolidatedTable<T> {
    pub fn from_rows(rows: Vec<T>) -> Self {
        Self {
            rows,
            failures: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
