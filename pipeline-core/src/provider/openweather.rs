use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    error::{PipelineError, Result},
    fetch::{FetchRequest, Fetcher},
    model::{FetchResult, Location, WeatherRecord},
    provider::{KeyedSource, SourceId},
};

/// Sub-blocks of the one-call response we never want; only `current` is kept.
pub const EXCLUDED_BLOCKS: &[&str] = &["minutely", "hourly", "daily", "alerts"];

/// Current conditions from the OpenWeather One Call 3.0 API.
#[derive(Debug, Clone)]
pub struct WeatherAdapter {
    fetcher: Fetcher,
    base_url: String,
    api_key: String,
    units: Option<String>,
}

impl WeatherAdapter {
    pub fn new(fetcher: Fetcher, base_url: impl Into<String>, api_key: String) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            api_key,
            units: None,
        }
    }

    /// `standard` (upstream default), `metric` or `imperial`.
    pub fn with_units(mut self, units: Option<String>) -> Self {
        self.units = units;
        self
    }

    pub fn request(&self, lat: f64, lon: f64) -> FetchRequest {
        let url = format!("{}/data/3.0/onecall", self.base_url.trim_end_matches('/'));
        let mut req = FetchRequest::new(SourceId::OpenWeather, url)
            .query("lat", lat)
            .query("lon", lon)
            .query("exclude", EXCLUDED_BLOCKS.join(","))
            .query("appid", &self.api_key);

        if let Some(units) = &self.units {
            req = req.query("units", units);
        }
        req
    }

    pub async fn fetch_weather(&self, location: &str, lat: f64, lon: f64) -> Result<WeatherRecord> {
        let result = self.fetcher.fetch(&self.request(lat, lon)).await?;
        normalize(location, &result)
    }
}

#[async_trait]
impl KeyedSource for WeatherAdapter {
    type Key = Location;
    type Row = WeatherRecord;

    fn source(&self) -> SourceId {
        SourceId::OpenWeather
    }

    async fn fetch_key(&self, key: &Location) -> Result<Vec<WeatherRecord>> {
        let record = self
            .fetch_weather(&key.name, key.latitude, key.longitude)
            .await?;
        Ok(vec![record])
    }
}

#[derive(Debug, Deserialize)]
struct OwCondition {
    id: i64,
    main: String,
    description: String,
    icon: String,
}

#[derive(Debug, Deserialize)]
struct OwPrecip {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwCurrent {
    dt: i64,
    sunrise: Option<i64>,
    sunset: Option<i64>,
    temp: Option<f64>,
    feels_like: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<f64>,
    dew_point: Option<f64>,
    uvi: Option<f64>,
    clouds: Option<f64>,
    visibility: Option<f64>,
    wind_speed: Option<f64>,
    wind_deg: Option<f64>,
    wind_gust: Option<f64>,
    rain: Option<OwPrecip>,
    snow: Option<OwPrecip>,
    weather: Vec<OwCondition>,
}

#[derive(Debug, Deserialize)]
struct OwOneCallResponse {
    lat: f64,
    lon: f64,
    timezone: Option<String>,
    timezone_offset: Option<i64>,
    current: OwCurrent,
}

/// Map a one-call payload onto a flat record. The first `current.weather`
/// entry is lifted into the `weather_*` columns.
pub fn normalize(location: &str, result: &FetchResult) -> Result<WeatherRecord> {
    let parsed = OwOneCallResponse::deserialize(&result.payload)
        .map_err(|e| PipelineError::schema(SourceId::OpenWeather, e.to_string()))?;

    let current = parsed.current;
    let condition = current.weather.into_iter().next().ok_or_else(|| {
        PipelineError::schema(
            SourceId::OpenWeather,
            format!("current.weather is empty for {location}"),
        )
    })?;

    Ok(WeatherRecord {
        location: location.to_string(),
        lat: parsed.lat,
        lon: parsed.lon,
        timezone: parsed.timezone,
        timezone_offset: parsed.timezone_offset,
        dt: current.dt,
        sunrise: current.sunrise,
        sunset: current.sunset,
        temp: current.temp,
        feels_like: current.feels_like,
        pressure: current.pressure,
        humidity: current.humidity,
        dew_point: current.dew_point,
        uvi: current.uvi,
        clouds: current.clouds,
        visibility: current.visibility,
        wind_speed: current.wind_speed,
        wind_deg: current.wind_deg,
        wind_gust: current.wind_gust,
        rain_1h: current.rain.and_then(|r| r.one_hour),
        snow_1h: current.snow.and_then(|s| s.one_hour),
        weather_id: condition.id,
        weather_main: condition.main,
        weather_description: condition.description,
        weather_icon: condition.icon,
        provenance: result.provenance(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;
    use std::time::Duration;

    fn result(payload: serde_json::Value) -> FetchResult {
        FetchResult {
            payload,
            attempts: 1,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            duration: Duration::from_millis(120),
        }
    }

    fn payload(weather: serde_json::Value) -> serde_json::Value {
        json!({
            "lat": 37.3,
            "lon": -80.0,
            "timezone": "America/New_York",
            "timezone_offset": -14400,
            "current": {
                "dt": 1_700_000_000,
                "sunrise": 1_699_990_000,
                "sunset": 1_700_030_000,
                "temp": 284.2,
                "feels_like": 283.1,
                "pressure": 1019,
                "humidity": 62,
                "dew_point": 277.0,
                "uvi": 1.2,
                "clouds": 40,
                "visibility": 10000,
                "wind_speed": 3.6,
                "wind_deg": 250,
                "rain": { "1h": 0.25 },
                "weather": weather
            }
        })
    }

    #[test]
    fn condition_is_flattened_into_top_level_fields() {
        let res = result(payload(json!([
            { "id": 802, "main": "Clouds", "description": "scattered clouds", "icon": "03d" }
        ])));

        let record = normalize("Roanoke", &res).expect("valid payload");

        assert_eq!(record.location, "Roanoke");
        assert_eq!(record.weather_id, 802);
        assert_eq!(record.weather_main, "Clouds");
        assert_eq!(record.weather_description, "scattered clouds");
        assert_eq!(record.weather_icon, "03d");
        assert_eq!(record.rain_1h, Some(0.25));
        assert_eq!(record.snow_1h, None);
        assert_eq!(record.wind_gust, None);
        assert_eq!(record.provenance.attempts, 1);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("weather").is_none());
        assert!(json.get("current").is_none());
        assert_eq!(json["weather_description"], "scattered clouds");
        assert_eq!(json["attempts"], 1);
    }

    #[test]
    fn empty_condition_array_is_a_schema_violation() {
        let err = normalize("Roanoke", &result(payload(json!([])))).unwrap_err();

        assert!(matches!(
            err,
            PipelineError::SchemaViolation {
                upstream: SourceId::OpenWeather,
                ..
            }
        ));
        assert!(err.to_string().contains("current.weather is empty"));
    }

    #[test]
    fn missing_current_block_is_a_schema_violation() {
        let err = normalize("Roanoke", &result(json!({ "lat": 1.0, "lon": 2.0 }))).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaViolation { .. }));
    }

    #[test]
    fn request_excludes_everything_but_current() {
        let fetcher = Fetcher::new(Default::default()).unwrap();
        let adapter = WeatherAdapter::new(fetcher, "https://api.openweathermap.org/", "KEY".into())
            .with_units(Some("metric".into()));

        let req = adapter.request(37.3, -80.0);

        assert_eq!(req.url, "https://api.openweathermap.org/data/3.0/onecall");
        assert_eq!(
            req.query,
            vec![
                ("lat", "37.3".to_string()),
                ("lon", "-80".to_string()),
                ("exclude", "minutely,hourly,daily,alerts".to_string()),
                ("appid", "KEY".to_string()),
                ("units", "metric".to_string()),
            ]
        );
    }
}
