//! Core library for the `weather-pipeline` tool.
//!
//! This crate defines:
//! - A resilient HTTP fetcher with retry, backoff and per-attempt events
//! - Adapters normalizing OpenWeather, Open-Meteo air-quality and NWS alert payloads
//! - Aggregation of per-location results into consolidated tables
//! - Configuration & credentials handling
//!
//! It is used by `weather-pipeline-cli`, but can also be driven by a scheduler
//! or any other binary through [`Pipeline::run`].

pub mod aggregate;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod provider;

pub use aggregate::{AlertsOutput, Pipeline, PipelineOutput};
pub use config::{Config, FailurePolicy};
pub use error::{AttemptError, PipelineError};
pub use fetch::{AttemptEvent, AttemptObserver, AttemptOutcome, FetchRequest, Fetcher, RetryPolicy};
pub use model::{
    AirQualityRecord, AlertRecord, AlertStatus, AlertView, ConsolidatedTable, FetchResult, Location,
    Provenance, SourceFailure, WeatherRecord,
};
pub use provider::{
    AirQualityAdapter, AlertMode, AlertQuery, AlertsAdapter, KeyedSource, SourceId,
    WeatherAdapter,
};
