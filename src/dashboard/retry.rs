//! Retry policy for outbound HTTP calls.
//!
//! The policy is a pure decision over `(attempt, error)`. Client errors stop
//! immediately, except 429 and GitHub's rate-limited 403. Server errors and
//! transport failures back off exponentially with full jitter. A server wait
//! hint (`Retry-After` or the rate-limit reset) takes precedence over the
//! computed backoff.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::HeaderMap;

use crate::errors::HttpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Decide what to do after `attempt` (1-based) failed with `error`.
    pub fn decide(&self, attempt: u32, error: &HttpError) -> RetryDecision {
        self.decide_with(attempt, error, |max_ms| {
            if max_ms == 0 {
                0
            } else {
                rand::rng().random_range(0..=max_ms)
            }
        })
    }

    /// [`decide`](Self::decide) with an injectable jitter function mapping
    /// the backoff ceiling in milliseconds to the actual delay.
    pub fn decide_with(
        &self,
        attempt: u32,
        error: &HttpError,
        jitter: impl FnOnce(u64) -> u64,
    ) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::Stop;
        }
        let hint = match error {
            HttpError::Status {
                status,
                retry_after,
                rate_limited,
                ..
            } => {
                let retryable = *status == 429 || *rate_limited || (500..600).contains(status);
                if !retryable {
                    return RetryDecision::Stop;
                }
                *retry_after
            }
            HttpError::Transport { .. } => None,
            HttpError::Decode { .. } => return RetryDecision::Stop,
        };
        if let Some(wait) = hint {
            return RetryDecision::Retry(wait.min(self.max_delay));
        }
        let ceiling = self.backoff_ceiling(attempt);
        let ms = jitter(ceiling.as_millis() as u64);
        RetryDecision::Retry(Duration::from_millis(ms).min(self.max_delay))
    }

    fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Run `send` until it succeeds or the policy says stop.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut send: F,
) -> Result<T, HttpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HttpError>>,
{
    let mut attempt = 1;
    loop {
        match send().await {
            Ok(value) => return Ok(value),
            Err(e) => match policy.decide(attempt, &e) {
                RetryDecision::Retry(delay) => {
                    tracing::warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::Stop => return Err(e),
            },
        }
    }
}

/// Send a request built by `build`, turning non-2xx responses into
/// [`HttpError::Status`] and retrying per `policy`.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    build: F,
) -> Result<reqwest::Response, HttpError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let build = &build;
    with_retry(policy, "http", move || async move {
        let request = build();
        let url = request
            .try_clone()
            .and_then(|r| r.build().ok())
            .map(|r| r.url().to_string())
            .unwrap_or_default();
        let response = request
            .send()
            .await
            .map_err(|source| HttpError::Transport {
                url: url.clone(),
                source,
            })?;
        check_status(response).await
    })
    .await
}

/// Pass 2xx responses through; classify everything else.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    let status = status.as_u16();
    Err(HttpError::Status {
        status,
        url,
        body,
        retry_after: wait_hint(&headers, Utc::now()),
        rate_limited: is_rate_limited(status, &headers),
    })
}

/// 429, or a 403 with the rate-limit budget exhausted.
pub fn is_rate_limited(status: u16, headers: &HeaderMap) -> bool {
    status == 429 || (status == 403 && header_str(headers, "x-ratelimit-remaining") == Some("0"))
}

/// Server wait hint: `Retry-After` (seconds or HTTP date), else the
/// `x-ratelimit-reset` epoch when the budget is exhausted.
pub fn wait_hint(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(raw) = header_str(headers, "retry-after") {
        let raw = raw.trim();
        if let Ok(secs) = raw.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(raw) {
            let secs = (at.with_timezone(&Utc) - now).num_seconds().max(0);
            return Some(Duration::from_secs(secs as u64));
        }
    }
    if header_str(headers, "x-ratelimit-remaining") == Some("0") {
        let reset = header_str(headers, "x-ratelimit-reset")?.parse::<i64>().ok()?;
        let secs = (reset - now.timestamp()).max(0);
        return Some(Duration::from_secs(secs as u64));
    }
    None
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
