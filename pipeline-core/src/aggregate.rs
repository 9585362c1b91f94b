//! Location aggregation and the pipeline entry point.
//!
//! Per-location sources (weather, alerts) are queried once per key and their
//! rows concatenated in input order. Air quality is a single batched call.
//! With [`FailurePolicy::Skip`] a failing key is dropped and recorded in the
//! table's `failures`; with [`FailurePolicy::FailFast`] the first failure
//! aborts the table and cancels any in-flight requests.

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::{Config, FailurePolicy, validate_locations},
    error::{PipelineError, Result},
    fetch::{AttemptObserver, Fetcher},
    model::{
        AirQualityRecord, AlertRecord, AlertStatus, AlertView, ConsolidatedTable, Location,
        SourceFailure, WeatherRecord,
    },
    provider::{
        AirQualityAdapter, AlertMode, AlertQuery, AlertsAdapter, KeyedSource, SourceId,
        WeatherAdapter,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSettings {
    /// Keys fetched at once. Output order does not depend on it.
    pub concurrency: usize,
    pub key_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            key_timeout: None,
            failure_policy: FailurePolicy::Skip,
        }
    }
}

/// Query `source` once per key and concatenate the rows in key order.
pub async fn collect_keyed<S: KeyedSource>(
    source: &S,
    keys: &[S::Key],
    settings: &AggregateSettings,
) -> Result<ConsolidatedTable<S::Row>> {
    let mut outcomes = stream::iter(keys)
        .map(|key| async move { (key, fetch_bounded(source, key, settings.key_timeout).await) })
        .buffered(settings.concurrency.max(1));

    let mut table = ConsolidatedTable::default();
    while let Some((key, outcome)) = outcomes.next().await {
        match outcome {
            Ok(rows) => table.rows.extend(rows),
            Err(err) => {
                record_failure(&mut table, source.source(), key.to_string(), err, settings)?;
            }
        }
    }

    if table.is_empty() {
        warn!(source = %source.source(), keys = keys.len(), "consolidated table is empty");
    }
    Ok(table)
}

async fn fetch_bounded<S: KeyedSource>(
    source: &S,
    key: &S::Key,
    limit: Option<Duration>,
) -> Result<Vec<S::Row>> {
    match limit {
        None => source.fetch_key(key).await,
        Some(after) => tokio::time::timeout(after, source.fetch_key(key))
            .await
            .map_err(|_| PipelineError::Timeout {
                upstream: source.source(),
                after,
            })?,
    }
}

fn record_failure<T>(
    table: &mut ConsolidatedTable<T>,
    source: SourceId,
    key: String,
    err: PipelineError,
    settings: &AggregateSettings,
) -> Result<()> {
    match settings.failure_policy {
        FailurePolicy::FailFast => Err(err),
        FailurePolicy::Skip => {
            warn!(source = %source, key = %key, error = %err, "skipping failed key");
            table.failures.push(SourceFailure {
                source,
                key,
                error: err.to_string(),
            });
            Ok(())
        }
    }
}

/// Unique alert queries in first-seen order. Locations sharing a forecast
/// zone share one query.
pub fn unique_alert_queries(locations: &[Location], mode: AlertMode) -> Vec<AlertQuery> {
    let mut seen = HashSet::new();
    locations
        .iter()
        .map(|loc| AlertQuery::for_location(loc, mode))
        .filter(|query| seen.insert(query.key()))
        .collect()
}

/// Left join: every location appears at least once, paired with each alert
/// queried for it, or with `None` when it has none. Locations whose query
/// was skipped after failing are marked [`AlertStatus::Failed`].
pub fn join_alerts(
    locations: &[Location],
    alerts: &ConsolidatedTable<AlertRecord>,
    mode: AlertMode,
) -> Vec<AlertView> {
    let failed: HashSet<&str> = alerts.failures.iter().map(|f| f.key.as_str()).collect();
    let mut joined = Vec::with_capacity(locations.len().max(alerts.len()));

    for loc in locations {
        let key = AlertQuery::for_location(loc, mode).key();
        if failed.contains(key.as_str()) {
            joined.push(AlertView {
                location: loc.clone(),
                alert_status: AlertStatus::Failed,
                alert: None,
            });
            continue;
        }

        let mut matched = alerts.rows.iter().filter(|a| a.query == key).peekable();
        if matched.peek().is_none() {
            joined.push(AlertView {
                location: loc.clone(),
                alert_status: AlertStatus::Ok,
                alert: None,
            });
            continue;
        }

        joined.extend(matched.map(|alert| AlertView {
            location: loc.clone(),
            alert_status: AlertStatus::Ok,
            alert: Some(alert.clone()),
        }));
    }

    joined
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsOutput {
    pub alerts: ConsolidatedTable<AlertRecord>,
    pub joined: Vec<AlertView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub weather: ConsolidatedTable<WeatherRecord>,
    pub air_quality: ConsolidatedTable<AirQualityRecord>,
    pub alerts: AlertsOutput,
}

/// The three adapters wired to one fetcher and one set of aggregation rules.
#[derive(Debug, Clone)]
pub struct Pipeline {
    weather: WeatherAdapter,
    air_quality: AirQualityAdapter,
    alerts: AlertsAdapter,
    alert_mode: AlertMode,
    settings: AggregateSettings,
    locations: Vec<Location>,
}

impl Pipeline {
    /// Fails with [`PipelineError::Configuration`] before any network call
    /// when credentials or settings are missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::build(config, None)
    }

    pub fn with_observer(config: &Config, observer: Arc<dyn AttemptObserver>) -> Result<Self> {
        Self::build(config, Some(observer))
    }

    fn build(config: &Config, observer: Option<Arc<dyn AttemptObserver>>) -> Result<Self> {
        config.validate()?;

        let mut fetcher = Fetcher::new(config.retry_policy()?)?;
        if let Some(observer) = observer {
            fetcher = fetcher.with_observer(observer);
        }

        let weather = WeatherAdapter::new(
            fetcher.clone(),
            &config.endpoints.openweather,
            config.openweather_api_key()?.to_string(),
        )
        .with_units(config.weather.units.clone());

        let air_quality = AirQualityAdapter::new(fetcher.clone(), &config.endpoints.air_quality)
            .with_timezone(&config.air_quality.timezone);

        let alerts = AlertsAdapter::new(
            fetcher,
            &config.endpoints.alerts,
            config.noaa_contact()?.to_string(),
        );

        Ok(Self {
            weather,
            air_quality,
            alerts,
            alert_mode: config.alerts.mode,
            settings: AggregateSettings {
                concurrency: config.fetch.concurrency,
                key_timeout: config.location_timeout()?,
                failure_policy: config.failure_policy,
            },
            locations: config.locations.clone(),
        })
    }

    pub fn with_alert_mode(mut self, mode: AlertMode) -> Self {
        self.alert_mode = mode;
        self
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub async fn fetch_all_weather(
        &self,
        locations: &[Location],
    ) -> Result<ConsolidatedTable<WeatherRecord>> {
        collect_keyed(&self.weather, locations, &self.settings).await
    }

    pub async fn fetch_all_air_quality(
        &self,
        locations: &[Location],
    ) -> Result<ConsolidatedTable<AirQualityRecord>> {
        let outcome = match self.settings.key_timeout {
            None => self.air_quality.fetch_air_quality(locations).await,
            Some(after) => {
                tokio::time::timeout(after, self.air_quality.fetch_air_quality(locations))
                    .await
                    .unwrap_or_else(|_| {
                        Err(PipelineError::Timeout {
                            upstream: SourceId::AirQuality,
                            after,
                        })
                    })
            }
        };

        match outcome {
            Ok(table) => Ok(table),
            Err(err) => {
                let mut table = ConsolidatedTable::default();
                let key = format!("{} locations", locations.len());
                record_failure(&mut table, SourceId::AirQuality, key, err, &self.settings)?;
                Ok(table)
            }
        }
    }

    /// One query per unique zone (or point), then a left join back onto
    /// `locations`.
    pub async fn fetch_all_alerts(&self, locations: &[Location]) -> Result<AlertsOutput> {
        let queries = unique_alert_queries(locations, self.alert_mode);
        let alerts = collect_keyed(&self.alerts, &queries, &self.settings).await?;
        let joined = join_alerts(locations, &alerts, self.alert_mode);

        Ok(AlertsOutput { alerts, joined })
    }

    /// Run every source over the configured locations.
    pub async fn run(&self) -> Result<PipelineOutput> {
        self.run_for(&self.locations).await
    }

    pub async fn run_for(&self, locations: &[Location]) -> Result<PipelineOutput> {
        validate_locations(locations)?;
        info!(locations = locations.len(), "pipeline run started");

        let weather = self.fetch_all_weather(locations).await?;
        let air_quality = self.fetch_all_air_quality(locations).await?;
        let alerts = self.fetch_all_alerts(locations).await?;

        info!(
            weather = weather.len(),
            air_quality = air_quality.len(),
            alerts = alerts.alerts.len(),
            failures = weather.failures.len()
                + air_quality.failures.len()
                + alerts.alerts.failures.len(),
            "pipeline run finished"
        );

        Ok(PipelineOutput {
            weather,
            air_quality,
            alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;

    use crate::model::Provenance;

    fn alert(query: &str, event: &str) -> AlertRecord {
        AlertRecord {
            query: query.into(),
            id: None,
            event: Some(event.into()),
            headline: None,
            area_desc: None,
            severity: None,
            certainty: None,
            urgency: None,
            status: None,
            message_type: None,
            category: None,
            sent: None,
            effective: None,
            onset: None,
            expires: None,
            ends: None,
            sender_name: None,
            description: None,
            instruction: None,
            response: None,
            provenance: Provenance {
                attempts: 1,
                fetched_at: DateTime::from_timestamp(0, 0).unwrap(),
                duration_secs: 0.0,
            },
        }
    }

    fn locations() -> Vec<Location> {
        vec![
            Location::new("A", 10.0, 20.0),
            Location::new("B", 30.0, 40.0).with_zone("zoneX"),
            Location::new("C", 50.0, 60.0).with_zone("zoneX"),
        ]
    }

    /// Echoes each key back as a row, failing for keys listed in `fail`.
    #[derive(Debug, Default)]
    struct Echo {
        fail: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KeyedSource for Echo {
        type Key = String;
        type Row = String;

        fn source(&self) -> SourceId {
            SourceId::OpenWeather
        }

        async fn fetch_key(&self, key: &String) -> Result<Vec<String>> {
            self.calls.lock().unwrap().push(key.clone());
            if self.fail.iter().any(|f| *f == key.as_str()) {
                return Err(PipelineError::FetchExhausted {
                    upstream: SourceId::OpenWeather,
                    attempts: 3,
                    last_error: "HTTP 500".into(),
                });
            }
            Ok(vec![key.to_uppercase()])
        }
    }

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn zone_mode_queries_each_zone_once() {
        let queries = unique_alert_queries(&locations(), AlertMode::Zone);
        assert_eq!(
            queries,
            vec![
                AlertQuery::Point { lat: 10.0, lon: 20.0 },
                AlertQuery::Zone("zoneX".into()),
            ]
        );

        let queries = unique_alert_queries(&locations(), AlertMode::Point);
        assert_eq!(queries.len(), 3);
    }

    #[test]
    fn join_is_a_left_join_on_query_key() {
        let alerts = ConsolidatedTable::from_rows(vec![
            alert("zoneX", "Flood Watch"),
            alert("zoneX", "Wind Advisory"),
        ]);

        let joined = join_alerts(&locations(), &alerts, AlertMode::Zone);

        assert_eq!(joined.len(), 5);
        assert_eq!(joined[0].location.name, "A");
        assert!(joined[0].alert.is_none());
        assert_eq!(joined[1].location.name, "B");
        assert_eq!(
            joined[2].alert.as_ref().and_then(|a| a.event.as_deref()),
            Some("Wind Advisory")
        );
        assert_eq!(joined[3].location.name, "C");
    }

    #[test]
    fn join_without_alerts_keeps_every_location() {
        let joined = join_alerts(&locations(), &ConsolidatedTable::default(), AlertMode::Zone);
        assert_eq!(joined.len(), 3);
        assert!(joined.iter().all(|v| v.alert.is_none()));
        assert!(joined.iter().all(|v| v.alert_status == AlertStatus::Ok));
    }

    #[test]
    fn failed_query_is_not_reported_as_quiet() {
        let alerts = ConsolidatedTable {
            rows: Vec::new(),
            failures: vec![SourceFailure {
                source: SourceId::Alerts,
                key: "zoneX".into(),
                error: "noaa-alerts request failed after 3 attempt(s): HTTP 500".into(),
            }],
        };

        let joined = join_alerts(&locations(), &alerts, AlertMode::Zone);

        assert_eq!(joined.len(), 3);
        assert_eq!(joined[0].location.name, "A");
        assert_eq!(joined[0].alert_status, AlertStatus::Ok);
        assert!(joined[1..].iter().all(|v| v.alert_status == AlertStatus::Failed));
        assert!(joined.iter().all(|v| v.alert.is_none()));
    }

    #[tokio::test]
    async fn skip_policy_records_failures_and_keeps_order() {
        let source = Echo {
            fail: vec!["b"],
            ..Default::default()
        };

        let table = collect_keyed(&source, &keys(&["a", "b", "c"]), &AggregateSettings::default())
            .await
            .unwrap();

        assert_eq!(table.rows, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(table.failures.len(), 1);
        assert_eq!(table.failures[0].key, "b");
        assert!(table.failures[0].error.contains("3 attempt(s)"));
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_failure() {
        let source = Echo {
            fail: vec!["b"],
            ..Default::default()
        };
        let settings = AggregateSettings {
            failure_policy: FailurePolicy::FailFast,
            ..Default::default()
        };

        let err = collect_keyed(&source, &keys(&["a", "b", "c"]), &settings)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::FetchExhausted { .. }));
        assert_eq!(*source.calls.lock().unwrap(), keys(&["a", "b"]));
    }

    #[tokio::test]
    async fn concurrent_fetch_preserves_input_order() {
        let source = Echo::default();
        let settings = AggregateSettings {
            concurrency: 4,
            ..Default::default()
        };
        let input = keys(&["a", "b", "c", "d", "e", "f"]);

        let table = collect_keyed(&source, &input, &settings).await.unwrap();

        assert_eq!(table.rows, keys(&["A", "B", "C", "D", "E", "F"]));
        assert!(table.is_complete());
    }

    #[tokio::test]
    async fn empty_key_list_is_an_empty_table() {
        let table = collect_keyed(&Echo::default(), &[], &AggregateSettings::default())
            .await
            .unwrap();
        assert!(table.is_empty());
        assert!(table.is_complete());
    }
}
