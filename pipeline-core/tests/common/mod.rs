#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use weather_pipeline_core::{
    AttemptEvent, AttemptObserver, Config, FetchRequest, Fetcher, Location, RetryPolicy, SourceId,
};

/// Millisecond backoff so retry tests stay fast.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base: Duration::from_millis(20),
        timeout: Duration::from_secs(2),
    }
}

pub fn fetcher(max_attempts: u32) -> Fetcher {
    Fetcher::new(fast_policy(max_attempts)).expect("client should build")
}

pub fn get(url: String) -> FetchRequest {
    FetchRequest::new(SourceId::OpenWeather, url).query("lat", 37.3)
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<AttemptEvent>>,
}

impl RecordingObserver {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AttemptEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AttemptObserver for RecordingObserver {
    fn on_attempt(&self, event: &AttemptEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A config pointing every source at `base_url`, with fast retries.
pub fn test_config(base_url: &str, locations: Vec<Location>) -> Config {
    let mut cfg = Config::default();
    cfg.set_openweather_api_key("TEST_KEY".into());
    cfg.set_noaa_contact("weather-pipeline-tests (ops@example.com)".into());
    cfg.fetch.max_attempts = 3;
    cfg.fetch.backoff_base_secs = 0.01;
    cfg.fetch.timeout_secs = 2.0;
    cfg.endpoints.openweather = base_url.to_string();
    cfg.endpoints.air_quality = base_url.to_string();
    cfg.endpoints.alerts = base_url.to_string();
    cfg.locations = locations;
    cfg
}

pub fn onecall_payload(lat: f64, lon: f64, description: &str) -> serde_json::Value {
    serde_json::json!({
        "lat": lat,
        "lon": lon,
        "timezone": "America/New_York",
        "timezone_offset": -18000,
        "current": {
            "dt": 1_704_830_400,
            "sunrise": 1_704_803_000,
            "sunset": 1_704_838_600,
            "temp": 279.4,
            "feels_like": 276.2,
            "pressure": 1012,
            "humidity": 71,
            "dew_point": 274.5,
            "uvi": 0.9,
            "clouds": 75,
            "visibility": 10000,
            "wind_speed": 5.1,
            "wind_deg": 160,
            "wind_gust": 9.8,
            "weather": [
                { "id": 803, "main": "Clouds", "description": description, "icon": "04d" }
            ]
        }
    })
}

pub fn air_quality_row(lat: f64, lon: f64, aqi: f64) -> serde_json::Value {
    serde_json::json!({
        "latitude": lat,
        "longitude": lon,
        "generationtime_ms": 0.2,
        "utc_offset_seconds": -18000,
        "timezone": "America/New_York",
        "timezone_abbreviation": "EST",
        "elevation": 120.0,
        "current_units": { "time": "unixtime", "us_aqi": "USAQI" },
        "current": {
            "time": 1_704_830_400,
            "interval": 3600,
            "us_aqi": aqi,
            "pm10": 10.26,
            "pm2_5": 6.04,
            "carbon_monoxide": 220.0,
            "nitrogen_dioxide": 9.49,
            "sulphur_dioxide": 2.2,
            "ozone": 48.0
        }
    })
}

pub fn alert_feature(id: &str, event: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "type": "Feature",
        "geometry": null,
        "properties": {
            "id": id,
            "areaDesc": "Test County",
            "event": event,
            "severity": "Moderate",
            "certainty": "Likely",
            "urgency": "Expected",
            "status": "Actual",
            "messageType": "Alert",
            "headline": format!("{event} issued"),
            "senderName": "NWS Test Office"
        }
    })
}

pub fn feature_collection(features: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "type": "FeatureCollection", "features": features })
}
