use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use inquire::{Password, PasswordDisplayMode, Text};
use tracing::info;
use weather_pipeline_core::{AlertMode, Config, Pipeline, PipelineOutput, SourceFailure};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-pipeline", version, about = "Weather, air quality and alert pipeline")]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store the OpenWeather API key and NOAA contact identity.
    Configure,

    /// List the locations the pipeline will query.
    Locations {
        /// TOML file of `[[locations]]` entries, overriding the config's list.
        #[arg(long)]
        locations: Option<PathBuf>,
    },

    /// Fetch every source once and print a summary.
    Run {
        /// TOML file of `[[locations]]` entries, overriding the config's list.
        #[arg(long)]
        locations: Option<PathBuf>,

        /// Write weather.json, air_quality.json and alerts.json into this directory.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override the configured alert query mode.
        #[arg(long, value_enum)]
        alert_mode: Option<AlertModeArg>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlertModeArg {
    /// One query per forecast zone; locations without one use their coordinates.
    Zone,
    /// One query per location's coordinates.
    Point,
}

impl From<AlertModeArg> for AlertMode {
    fn from(arg: AlertModeArg) -> Self {
        match arg {
            AlertModeArg::Zone => AlertMode::Zone,
            AlertModeArg::Point => AlertMode::Point,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = self.load_config()?;

        match self.command {
            Command::Configure => configure(&mut config, self.config.as_deref()),
            Command::Locations { locations } => {
                if let Some(path) = locations {
                    config.locations = Config::load_locations(&path)?;
                }
                print_locations(&config);
                Ok(())
            }
            Command::Run {
                locations,
                output,
                alert_mode,
            } => {
                config.apply_env();
                if let Some(path) = locations {
                    config.locations = Config::load_locations(&path)?;
                }

                let mut pipeline = Pipeline::from_config(&config)?;
                if let Some(mode) = alert_mode {
                    pipeline = pipeline.with_alert_mode(mode.into());
                }

                let result = pipeline.run().await?;
                print_summary(&result);

                if let Some(dir) = output {
                    export(&result, &dir)?;
                }
                Ok(())
            }
        }
    }

    /// An explicit `--config` path must exist, except for `configure`,
    /// which creates it.
    fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) if !path.exists() && matches!(self.command, Command::Configure) => {
                Ok(Config::default())
            }
            Some(path) => Config::load_from(path),
            None => Config::load(),
        }
    }
}

fn configure(config: &mut Config, path: Option<&std::path::Path>) -> Result<()> {
    let api_key = Password::new("OpenWeather API key:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    let contact = Text::new("Contact for api.weather.gov (User-Agent):")
        .with_placeholder("weather-pipeline (you@example.com)")
        .prompt()
        .context("Failed to read contact identity")?;

    config.set_openweather_api_key(api_key.trim().to_string());
    config.set_noaa_contact(contact.trim().to_string());

    match path {
        Some(path) => config.save_to(path)?,
        None => config.save()?,
    }

    println!("Configuration saved.");
    Ok(())
}

fn print_locations(config: &Config) {
    if config.locations.is_empty() {
        println!("No locations configured.");
        return;
    }

    println!("{:<24} {:>9} {:>10}  {}", "Name", "Latitude", "Longitude", "Zone");
    for loc in &config.locations {
        println!(
            "{:<24} {:>9.4} {:>10.4}  {}",
            loc.name,
            loc.latitude,
            loc.longitude,
            loc.forecast_zone.as_deref().unwrap_or("-")
        );
    }
}

fn print_summary(result: &PipelineOutput) {
    println!("Weather:     {} row(s)", result.weather.len());
    println!("Air quality: {} row(s)", result.air_quality.len());
    println!(
        "Alerts:      {} active, {} joined row(s)",
        result.alerts.alerts.len(),
        result.alerts.joined.len()
    );

    let failures: Vec<&SourceFailure> = result
        .weather
        .failures
        .iter()
        .chain(&result.air_quality.failures)
        .chain(&result.alerts.alerts.failures)
        .collect();

    if !failures.is_empty() {
        println!("\nSkipped:");
        for f in failures {
            println!("  [{}] {}: {}", f.source, f.key, f.error);
        }
    }
}

fn export(result: &PipelineOutput, dir: &std::path::Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    write_json(&dir.join("weather.json"), &result.weather)?;
    write_json(&dir.join("air_quality.json"), &result.air_quality)?;
    write_json(&dir.join("alerts.json"), &result.alerts)?;

    info!(dir = %dir.display(), exported_at = %Utc::now(), "tables exported");
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &std::path::Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
