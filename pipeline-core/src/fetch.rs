//! Resilient HTTP fetcher.
//!
//! Every upstream call goes through [`Fetcher::fetch`]: a GET with a fixed
//! per-attempt timeout, retried with exponential backoff until it succeeds or
//! the attempt budget runs out. A failed attempt is any of:
//! - transport error (DNS, refused connection, timeout)
//! - non-2xx status
//! - a body that is not JSON
//!
//! Callers never receive a [`FetchResult`] unless some attempt succeeded.

use std::{fmt::Debug, sync::Arc, time::Duration};

use chrono::Utc;
use reqwest::Client;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    error::{AttemptError, PipelineError, Result},
    model::FetchResult,
    provider::SourceId,
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Query parameters whose values are credentials and must not be logged.
const SECRET_PARAMS: &[&str] = &["appid"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles for each further failure.
    pub backoff_base: Duration,
    /// Per-attempt request timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Sleep taken after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    /// With the default 2s base that is 2, 4, 8, ... seconds.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }

    /// Sum of the delays slept when the first `failures` attempts fail.
    pub fn total_backoff(&self, failures: u32) -> Duration {
        (1..=failures).map(|a| self.delay_after(a)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(String),
}

/// Emitted once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptEvent {
    pub source: SourceId,
    pub attempt: u32,
    pub max_attempts: u32,
    pub outcome: AttemptOutcome,
}

/// Hook for observing individual attempts, e.g. for metrics or tests.
pub trait AttemptObserver: Send + Sync + Debug {
    fn on_attempt(&self, event: &AttemptEvent);
}

/// One logical GET request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source: SourceId,
    pub url: String,
    pub query: Vec<(&'static str, String)>,
    pub headers: Vec<(&'static str, String)>,
}

impl FetchRequest {
    pub fn new(source: SourceId, url: impl Into<String>) -> Self {
        Self {
            source,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn query(mut self, name: &'static str, value: impl ToString) -> Self {
        self.query.push((name, value.to_string()));
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Query parameters rendered for logs, with credentials masked.
    pub fn params_for_log(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| {
                if SECRET_PARAMS.contains(k) {
                    format!("{k}=***")
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    http: Client,
    policy: RetryPolicy,
    observer: Option<Arc<dyn AttemptObserver>>,
}

impl Fetcher {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(policy.timeout)
            .build()
            .map_err(|e| PipelineError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(http, policy))
    }

    pub fn with_client(http: Client, policy: RetryPolicy) -> Self {
        Self {
            http,
            policy,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `request` until an attempt succeeds or the policy's budget is spent.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        let max_attempts = self.policy.max_attempts.max(1);
        let timestamp = Utc::now();
        let started = Instant::now();
        let params = request.params_for_log();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(
                source = %request.source,
                attempt,
                max_attempts,
                url = %request.url,
                params = %params,
                "sending request"
            );

            match self.attempt(request).await {
                Ok(payload) => {
                    let duration = started.elapsed();
                    info!(
                        source = %request.source,
                        attempt,
                        duration_ms = duration.as_millis() as u64,
                        "request succeeded"
                    );
                    self.notify(request.source, attempt, max_attempts, AttemptOutcome::Succeeded);

                    return Ok(FetchResult {
                        payload,
                        attempts: attempt,
                        timestamp,
                        duration,
                    });
                }
                Err(err) => {
                    warn!(
                        source = %request.source,
                        attempt,
                        max_attempts,
                        params = %params,
                        error = %err,
                        "attempt failed"
                    );
                    last_error = err.to_string();
                    self.notify(
                        request.source,
                        attempt,
                        max_attempts,
                        AttemptOutcome::Failed(last_error.clone()),
                    );

                    if attempt < max_attempts {
                        let delay = self.policy.delay_after(attempt);
                        debug!(source = %request.source, ?delay, "backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(
            source = %request.source,
            attempts = max_attempts,
            params = %params,
            "retries exhausted"
        );

        Err(PipelineError::FetchExhausted {
            upstream: request.source,
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(&self, request: &FetchRequest) -> Result<serde_json::Value, AttemptError> {
        let mut builder = self.http.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }

        let res = builder.send().await?;
        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(AttemptError::Status {
                status,
                body: truncate_body(&body),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    fn notify(&self, source: SourceId, attempt: u32, max_attempts: u32, outcome: AttemptOutcome) {
        if let Some(observer) = &self.observer {
            observer.on_attempt(&AttemptEvent {
                source,
                attempt,
                max_attempts,
                outcome,
            });
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
