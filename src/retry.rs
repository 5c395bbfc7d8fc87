//! Retry policy for remote requests.
//!
//! Each request attempt reports an [`Attempt`]; [`RetryPolicy::run`] decides
//! whether to sleep and try again. Transient failures back off
//! exponentially with ±25% jitter, or wait exactly as long as the server's
//! `Retry-After` hint asks.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use reqwest::StatusCode;

use crate::config::SyncConfig;
use crate::error::SyncError;

/// How a non-success HTTP status should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    Fail,
    Unauthorized,
}

pub type Classifier = fn(StatusCode) -> Disposition;

/// 401/403 are credential problems; 408, 429, and 5xx are worth retrying;
/// everything else (404, other 4xx) is permanent.
pub fn default_classifier(status: StatusCode) -> Disposition {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Disposition::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => Disposition::Retry,
        s if s.is_server_error() => Disposition::Retry,
        _ => Disposition::Fail,
    }
}

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Transient {
        error: String,
        retry_after: Option<Duration>,
    },
    Permanent(SyncError),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub classifier: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: true,
            classifier: default_classifier,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(sync: &SyncConfig) -> Self {
        Self {
            max_attempts: sync.max_retries.max(1),
            base_delay: Duration::from_millis(sync.retry_base_delay_ms),
            max_delay: Duration::from_millis(sync.retry_max_delay_ms),
            ..Self::default()
        }
    }

    pub fn classify(&self, status: StatusCode) -> Disposition {
        (self.classifier)(status)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint;
        }
        let exp = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let capped = base_ms.saturating_mul(exp).min(max_ms);
        if !self.jitter {
            return Duration::from_millis(capped);
        }
        let jitter_range = capped / 4;
        let jitter = if jitter_range > 0 {
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64;
            seed % (jitter_range * 2)
        } else {
            0
        };
        Duration::from_millis(
            capped
                .saturating_sub(jitter_range)
                .saturating_add(jitter)
                .min(max_ms),
        )
    }

    /// Drive `op` until it succeeds, fails permanently, or runs out of
    /// attempts. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Attempt::Success(value) => return Ok(value),
                Attempt::Permanent(err) => return Err(err),
                Attempt::Transient { error, retry_after } => {
                    if attempt >= self.max_attempts {
                        return Err(SyncError::transient(format!(
                            "{} (gave up after {} attempts)",
                            error, attempt
                        )));
                    }
                    let delay = self.delay_for(attempt, retry_after);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient request failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let wait = at.signed_duration_since(Utc::now());
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
