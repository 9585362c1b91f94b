use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::Result;

pub mod noaa;
pub mod open_meteo;
pub mod openweather;

pub use noaa::{AlertMode, AlertQuery, AlertsAdapter};
pub use open_meteo::AirQualityAdapter;
pub use openweather::WeatherAdapter;

/// Upstream API a record or failure originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    OpenWeather,
    AirQuality,
    Alerts,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::OpenWeather => "openweather",
            SourceId::AirQuality => "open-meteo-air-quality",
            SourceId::Alerts => "noaa-alerts",
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for SourceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// An adapter queried once per key (a location, a forecast zone, ...).
///
/// The aggregator drives implementations of this trait; each call yields zero
/// or more normalized rows for that key.
#[async_trait]
pub trait KeyedSource: Send + Sync + Debug {
    type Key: Send + Sync + std::fmt::Display;
    type Row: Send;

    fn source(&self) -> SourceId;

    async fn fetch_key(&self, key: &Self::Key) -> Result<Vec<Self::Row>>;
}

/// Round to one decimal place.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
