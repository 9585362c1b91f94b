use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{PipelineError, Result},
    fetch::{FetchRequest, Fetcher},
    model::{AlertRecord, FetchResult, Location},
    provider::{KeyedSource, SourceId},
};

pub const URGENCY: &[&str] = &["Immediate", "Expected"];
pub const SEVERITY: &[&str] = &["Extreme", "Severe", "Moderate", "Minor", "Unknown"];
pub const CERTAINTY: &[&str] = &["Observed", "Likely", "Possible", "Unlikely", "Unknown"];

/// How locations are turned into alert queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertMode {
    /// One query per unique forecast zone; zoneless locations use their point.
    #[default]
    Zone,
    /// One query per location's coordinates.
    Point,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertQuery {
    Zone(String),
    Point { lat: f64, lon: f64 },
}

impl AlertQuery {
    /// Zone mode uses the location's forecast zone and falls back to its
    /// coordinates when it has none.
    pub fn for_location(location: &Location, mode: AlertMode) -> Self {
        let zone = location
            .forecast_zone
            .as_deref()
            .map(str::trim)
            .filter(|z| !z.is_empty());

        match (mode, zone) {
            (AlertMode::Zone, Some(zone)) => AlertQuery::Zone(zone.to_string()),
            _ => AlertQuery::Point {
                lat: location.latitude,
                lon: location.longitude,
            },
        }
    }

    /// Value alert rows are tagged with and joined back on.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for AlertQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertQuery::Zone(zone) => f.write_str(zone),
            AlertQuery::Point { lat, lon } => write!(f, "{lat},{lon}"),
        }
    }
}

/// Active alerts from the National Weather Service API (api.weather.gov).
#[derive(Debug, Clone)]
pub struct AlertsAdapter {
    fetcher: Fetcher,
    base_url: String,
    contact: String,
}

impl AlertsAdapter {
    /// `contact` is sent as the User-Agent, which api.weather.gov requires.
    pub fn new(fetcher: Fetcher, base_url: impl Into<String>, contact: String) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            contact,
        }
    }

    pub fn request(&self, query: &AlertQuery) -> FetchRequest {
        let url = format!("{}/alerts/active", self.base_url.trim_end_matches('/'));
        let req = FetchRequest::new(SourceId::Alerts, url);

        let req = match query {
            AlertQuery::Zone(zone) => req.query("zone", zone),
            AlertQuery::Point { .. } => req.query("point", query.key()),
        };

        req.query("urgency", URGENCY.join(","))
            .query("severity", SEVERITY.join(","))
            .query("certainty", CERTAINTY.join(","))
            .header("User-Agent", &self.contact)
            .header("Accept", "application/geo+json")
    }

    /// Zero or more alert rows, each tagged with `query`.
    pub async fn fetch_alerts(&self, query: &AlertQuery) -> Result<Vec<AlertRecord>> {
        let result = self.fetcher.fetch(&self.request(query)).await?;
        let rows = normalize(&query.key(), &result)?;
        debug!(query = %query, count = rows.len(), "alerts normalized");
        Ok(rows)
    }
}

#[async_trait]
impl KeyedSource for AlertsAdapter {
    type Key = AlertQuery;
    type Row = AlertRecord;

    fn source(&self) -> SourceId {
        SourceId::Alerts
    }

    async fn fetch_key(&self, key: &AlertQuery) -> Result<Vec<AlertRecord>> {
        self.fetch_alerts(key).await
    }
}

#[derive(Debug, Deserialize)]
struct NoaaCollection {
    features: Vec<NoaaFeature>,
}

#[derive(Debug, Deserialize)]
struct NoaaFeature {
    id: Option<String>,
    #[serde(default)]
    properties: NoaaProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct NoaaProperties {
    id: Option<String>,
    area_desc: Option<String>,
    event: Option<String>,
    headline: Option<String>,
    severity: Option<String>,
    certainty: Option<String>,
    urgency: Option<String>,
    status: Option<String>,
    message_type: Option<String>,
    category: Option<String>,
    sent: Option<String>,
    effective: Option<String>,
    onset: Option<String>,
    expires: Option<String>,
    ends: Option<String>,
    sender_name: Option<String>,
    description: Option<String>,
    instruction: Option<String>,
    response: Option<String>,
}

/// One row per feature. An empty `features` array is a valid, empty result;
/// a missing one is a schema violation.
pub fn normalize(query: &str, result: &FetchResult) -> Result<Vec<AlertRecord>> {
    let collection = NoaaCollection::deserialize(&result.payload)
        .map_err(|e| PipelineError::schema(SourceId::Alerts, e.to_string()))?;

    let provenance = result.provenance();
    let rows = collection
        .features
        .into_iter()
        .map(|feature| {
            let p = feature.properties;
            AlertRecord {
                query: query.to_string(),
                id: feature.id.or(p.id),
                event: p.event,
                headline: p.headline,
                area_desc: p.area_desc,
                severity: p.severity,
                certainty: p.certainty,
                urgency: p.urgency,
                status: p.status,
                message_type: p.message_type,
                category: p.category,
                sent: p.sent,
                effective: p.effective,
                onset: p.onset,
                expires: p.expires,
                ends: p.ends,
                sender_name: p.sender_name,
                description: p.description,
                instruction: p.instruction,
                response: p.response,
                provenance,
            }
        })
        .collect();

    Ok(rows)
}
