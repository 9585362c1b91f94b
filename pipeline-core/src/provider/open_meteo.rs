use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    error::{PipelineError, Result},
    fetch::{FetchRequest, Fetcher},
    model::{AirQualityRecord, ConsolidatedTable, FetchResult, Location, Provenance},
    provider::{SourceId, round1},
};

/// Pollutants requested in the `current` block.
pub const CURRENT_PARAMS: &[&str] = &[
    "us_aqi",
    "pm10",
    "pm2_5",
    "carbon_monoxide",
    "nitrogen_dioxide",
    "sulphur_dioxide",
    "ozone",
];

pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Batched air-quality lookups against the Open-Meteo air-quality API.
///
/// Upstream accepts many coordinate pairs in one call, so unlike the other
/// adapters this one is queried once for the whole location list.
#[derive(Debug, Clone)]
pub struct AirQualityAdapter {
    fetcher: Fetcher,
    base_url: String,
    timezone: String,
}

impl AirQualityAdapter {
    pub fn new(fetcher: Fetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn request(&self, locations: &[Location]) -> FetchRequest {
        let url = format!("{}/v1/air-quality", self.base_url.trim_end_matches('/'));
        let latitudes = join_coords(locations.iter().map(|l| l.latitude));
        let longitudes = join_coords(locations.iter().map(|l| l.longitude));

        FetchRequest::new(SourceId::AirQuality, url)
            .query("current", CURRENT_PARAMS.join(","))
            .query("timezone", &self.timezone)
            .query("timeformat", "unixtime")
            .query("latitude", latitudes)
            .query("longitude", longitudes)
    }

    /// One row per input location, in input order.
    pub async fn fetch_air_quality(
        &self,
        locations: &[Location],
    ) -> Result<ConsolidatedTable<AirQualityRecord>> {
        if locations.is_empty() {
            warn!(source = %SourceId::AirQuality, "no locations to query");
            return Ok(ConsolidatedTable::default());
        }

        let result = self.fetcher.fetch(&self.request(locations)).await?;
        normalize(locations, &result).map(ConsolidatedTable::from_rows)
    }
}

fn join_coords(values: impl Iterator<Item = f64>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Deserialize)]
struct OmCurrent {
    time: Option<i64>,
    interval: Option<i64>,
    us_aqi: Option<f64>,
    pm10: Option<f64>,
    pm2_5: Option<f64>,
    carbon_monoxide: Option<f64>,
    nitrogen_dioxide: Option<f64>,
    sulphur_dioxide: Option<f64>,
    ozone: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OmLocation {
    latitude: f64,
    longitude: f64,
    elevation: Option<f64>,
    current: Option<OmCurrent>,
}

/// Join key: coordinates rounded to one decimal, in tenths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CoordKey(i64, i64);

impl CoordKey {
    fn new(latitude: f64, longitude: f64) -> Self {
        Self(
            (round1(latitude) * 10.0).round() as i64,
            (round1(longitude) * 10.0).round() as i64,
        )
    }
}

/// Left-join the upstream rows onto `locations` by rounded coordinates.
/// Locations upstream did not answer for keep `None` measurements.
pub fn normalize(locations: &[Location], result: &FetchResult) -> Result<Vec<AirQualityRecord>> {
    let upstream = parse_payload(&result.payload)?;

    let mut by_coord: HashMap<CoordKey, OmLocation> = HashMap::with_capacity(upstream.len());
    for row in upstream {
        by_coord
            .entry(CoordKey::new(row.latitude, row.longitude))
            .or_insert(row);
    }

    let provenance = result.provenance();
    let rows = locations
        .iter()
        .map(|loc| {
            let matched = by_coord.get(&CoordKey::new(loc.latitude, loc.longitude));
            if matched.is_none() {
                debug!(location = %loc.name, "no air-quality row for coordinates");
            }
            build_row(loc, matched, provenance)
        })
        .collect();

    Ok(rows)
}

fn parse_payload(payload: &serde_json::Value) -> Result<Vec<OmLocation>> {
    let items: Vec<&serde_json::Value> = match payload {
        serde_json::Value::Array(items) => items.iter().collect(),
        serde_json::Value::Object(_) => vec![payload],
        other => {
            return Err(PipelineError::schema(
                SourceId::AirQuality,
                format!("expected an object or array, got {other}"),
            ));
        }
    };

    items
        .into_iter()
        .map(|item| {
            OmLocation::deserialize(item)
                .map_err(|e| PipelineError::schema(SourceId::AirQuality, e.to_string()))
        })
        .collect()
}

fn build_row(
    loc: &Location,
    matched: Option<&OmLocation>,
    provenance: Provenance,
) -> AirQualityRecord {
    let current = matched.and_then(|m| m.current.as_ref());
    let measure = |pick: fn(&OmCurrent) -> Option<f64>| current.and_then(pick).map(round1);

    AirQualityRecord {
        name: loc.name.clone(),
        latitude: loc.latitude,
        longitude: loc.longitude,
        forecast_zone: loc.forecast_zone.clone(),
        time: current.and_then(|c| c.time),
        interval: current.and_then(|c| c.interval),
        elevation: matched.and_then(|m| m.elevation).map(round1),
        us_aqi: measure(|c| c.us_aqi),
        pm10: measure(|c| c.pm10),
        pm2_5: measure(|c| c.pm2_5),
        carbon_monoxide: measure(|c| c.carbon_monoxide),
        nitrogen_dioxide: measure(|c| c.nitrogen_dioxide),
        sulphur_dioxide: measure(|c| c.sulphur_dioxide),
        ozone: measure(|c| c.ozone),
        provenance,
    }
}
