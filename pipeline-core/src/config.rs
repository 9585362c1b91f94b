use anyhow::{Context, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::{PipelineError, Result},
    fetch::RetryPolicy,
    model::Location,
    provider::noaa::AlertMode,
};

pub const OPENWEATHER_API_KEY_ENV: &str = "OPENWEATHER_API_KEY";
pub const NOAA_CONTACT_ENV: &str = "NOAA_CONTACT";

/// Credentials for the upstream APIs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub openweather_api_key: Option<String>,
    /// Contact identity (e.g. `app-name (me@example.com)`) sent as the
    /// User-Agent to api.weather.gov.
    pub noaa_contact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub max_attempts: u32,
    pub backoff_base_secs: f64,
    pub timeout_secs: f64,
    /// Locations fetched at once. 1 means strictly sequential.
    pub concurrency: usize,
    /// Upper bound for one location's fetch, retries included.
    pub location_timeout_secs: Option<f64>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 2.0,
            timeout_secs: 10.0,
            concurrency: 1,
            location_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub openweather: String,
    pub air_quality: String,
    pub alerts: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            openweather: "https://api.openweathermap.org".to_string(),
            air_quality: "https://air-quality-api.open-meteo.com".to_string(),
            alerts: "https://api.weather.gov".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSettings {
    /// `standard`, `metric` or `imperial`; upstream defaults to `standard`.
    pub units: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AirQualitySettings {
    pub timezone: String,
}

impl Default for AirQualitySettings {
    fn default() -> Self {
        Self {
            timezone: crate::provider::open_meteo::DEFAULT_TIMEZONE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub mode: AlertMode,
}

/// What the aggregator does when one location's fetch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Drop the location's rows, record the failure and keep going.
    #[default]
    Skip,
    /// Abort the whole table on the first failure.
    FailFast,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [credentials]
/// openweather_api_key = "..."
/// noaa_contact = "weather-pipeline (me@example.com)"
///
/// [fetch]
/// max_attempts = 4
///
/// [[locations]]
/// name = "Roanoke"
/// latitude = 37.3
/// longitude = -80.0
/// forecast_zone = "VAZ022"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub failure_policy: FailurePolicy,
    pub credentials: Credentials,
    pub fetch: FetchSettings,
    pub endpoints: Endpoints,
    pub weather: WeatherSettings,
    pub air_quality: AirQualitySettings,
    pub alerts: AlertSettings,
    #[serde(deserialize_with = "locations_any_case")]
    pub locations: Vec<Location>,
}

#[derive(Debug, Default, Deserialize)]
struct LocationsFile {
    #[serde(default, deserialize_with = "locations_any_case")]
    locations: Vec<Location>,
}

/// Location keys are matched case-insensitively: `Name`, `LATITUDE`, ...
fn locations_any_case<'de, D>(deserializer: D) -> Result<Vec<Location>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|value| {
            Location::deserialize(lowercase_keys(value))
                .map_err(<D::Error as serde::de::Error>::custom)
        })
        .collect()
}

fn lowercase_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v))
                .collect(),
        ),
        other => other,
    }
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> anyhow::Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-pipeline", "weather-pipeline")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Read a standalone TOML file of `[[locations]]` entries.
    pub fn load_locations(path: &Path) -> anyhow::Result<Vec<Location>> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read locations file: {}", path.display()))?;

        let file: LocationsFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse locations file: {}", path.display()))?;

        Ok(file.locations)
    }

    /// Overlay credentials from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(OPENWEATHER_API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.credentials.openweather_api_key = Some(key);
        }
        if let Some(contact) = lookup(NOAA_CONTACT_ENV).filter(|v| !v.trim().is_empty()) {
            self.credentials.noaa_contact = Some(contact);
        }
    }

    pub fn set_openweather_api_key(&mut self, api_key: String) {
        self.credentials.openweather_api_key = Some(api_key);
    }

    pub fn set_noaa_contact(&mut self, contact: String) {
        self.credentials.noaa_contact = Some(contact);
    }

    pub fn openweather_api_key(&self) -> Result<&str> {
        non_blank(self.credentials.openweather_api_key.as_deref()).ok_or_else(|| {
            PipelineError::config(format!(
                "No OpenWeather API key configured.\n\
                 Hint: set {OPENWEATHER_API_KEY_ENV} or run `weather-pipeline configure`."
            ))
        })
    }

    pub fn noaa_contact(&self) -> Result<&str> {
        non_blank(self.credentials.noaa_contact.as_deref()).ok_or_else(|| {
            PipelineError::config(format!(
                "No NOAA contact identity configured (api.weather.gov requires one).\n\
                 Hint: set {NOAA_CONTACT_ENV} or run `weather-pipeline configure`."
            ))
        })
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        if self.fetch.max_attempts == 0 {
            return Err(PipelineError::config("fetch.max_attempts must be at least 1"));
        }

        Ok(RetryPolicy {
            max_attempts: self.fetch.max_attempts,
            backoff_base: secs("fetch.backoff_base_secs", self.fetch.backoff_base_secs)?,
            timeout: secs("fetch.timeout_secs", self.fetch.timeout_secs)?,
        })
    }

    pub fn location_timeout(&self) -> Result<Option<Duration>> {
        self.fetch
            .location_timeout_secs
            .map(|s| secs("fetch.location_timeout_secs", s))
            .transpose()
    }

    /// Everything a run needs, checked before any network activity.
    pub fn validate(&self) -> Result<()> {
        self.openweather_api_key()?;
        self.noaa_contact()?;
        self.retry_policy()?;
        self.location_timeout()?;

        if self.fetch.concurrency == 0 {
            return Err(PipelineError::config("fetch.concurrency must be at least 1"));
        }

        validate_locations(&self.locations)
    }
}

pub fn validate_locations(locations: &[Location]) -> Result<()> {
    for loc in locations {
        if loc.name.trim().is_empty() {
            return Err(PipelineError::config("location with an empty name"));
        }
        if !loc.has_valid_coordinates() {
            return Err(PipelineError::config(format!(
                "location '{}' has out-of-range coordinates ({}, {})",
                loc.name, loc.latitude, loc.longitude
            )));
        }
    }
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn secs(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| PipelineError::config(format!("{name} must be a non-negative number, got {value}")))
}
