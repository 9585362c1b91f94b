use std::time::Duration;

use reqwest::StatusCode;

use crate::provider::SourceId;

/// Failures surfaced by the pipeline to its callers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing credential or invalid setting. Raised before any network call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Every attempt against an upstream API failed.
    #[error("{upstream} request failed after {attempts} attempt(s): {last_error}")]
    FetchExhausted {
        upstream: SourceId,
        attempts: u32,
        last_error: String,
    },

    /// Upstream payload does not have the expected shape.
    #[error("{upstream} returned an unexpected payload: {detail}")]
    SchemaViolation { upstream: SourceId, detail: String },

    /// A caller-level deadline elapsed before the fetch finished.
    #[error("{upstream} request timed out after {after:?}")]
    Timeout { upstream: SourceId, after: Duration },
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn schema(source: SourceId, detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            upstream: source,
            detail: detail.into(),
        }
    }

    /// Source the error is attributed to, if any.
    pub fn source_id(&self) -> Option<SourceId> {
        match self {
            Self::Configuration(_) => None,
            Self::FetchExhausted { upstream, .. }
            | Self::SchemaViolation { upstream, .. }
            | Self::Timeout { upstream, .. } => Some(*upstream),
        }
    }
}

/// A single failed attempt. Recovered by retrying; only its text escapes
/// through [`PipelineError::FetchExhausted`].
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid JSON body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The request URL carries credentials in its query string, so it is
/// stripped before the error can reach a log line or a failure record.
impl From<reqwest::Error> for AttemptError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.without_url())
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
