//! Typed error hierarchy for testboard.
//!
//! Four enums cover the subsystems:
//! - `ChannelError`: publish/subscribe transport failures
//! - `ReportError`: report query path (validation vs. infrastructure vs. publish)
//! - `HttpError`: outbound HTTP calls (GitHub, report API), classified for retry
//! - `CoordinatorError`: pull-request coordinator runs that abort as a whole

use std::time::Duration;

use thiserror::Error;

/// Errors from the message channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to serialize payload for topic {topic}: {source}")]
    Serialize {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Channel closed for topic {topic}")]
    Closed { topic: String },

    #[error("Publish to {topic} failed: {message}")]
    Transport { topic: String, message: String },
}

/// Errors from the report query path.
///
/// `Validation` is raised before any deletion or dispatch happens. A missing
/// summary is never an error on this path; absence triggers generation.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Datastore error: {0:#}")]
    Infrastructure(#[source] anyhow::Error),

    #[error(transparent)]
    Publish(#[from] ChannelError),
}

impl ReportError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Errors from outbound HTTP calls.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
        /// Server-provided wait hint (`Retry-After` or the rate-limit reset).
        retry_after: Option<Duration>,
        /// GitHub signals secondary rate limits with 403 + `x-ratelimit-remaining: 0`.
        rate_limited: bool,
    },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl HttpError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors that abort a whole coordinator pass.
///
/// Per-item failures never surface here; they are collected in the run report.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Failed to fetch tracked pull requests: {0:#}")]
    Upstream(#[source] anyhow::Error),
}
