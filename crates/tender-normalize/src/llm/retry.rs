use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::CompletionError;

/// Body fragments that mark a quota or billing refusal rather than a transient limit.
const QUOTA_MARKERS: &[&str] = &[
    "insufficient_quota",
    "quota",
    "billing",
    "credit balance",
    "payment required",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Maps a non-success response to an error, separating quota exhaustion.
pub fn classify_failure(status: StatusCode, body: String) -> CompletionError {
    let lower = body.to_ascii_lowercase();
    let quota_marker = QUOTA_MARKERS.iter().any(|marker| lower.contains(marker));
    let is_quota = status == StatusCode::PAYMENT_REQUIRED
        || (matches!(status, StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN) && quota_marker);
    if is_quota {
        CompletionError::Quota {
            status: status.as_u16(),
            body,
        }
    } else {
        CompletionError::Status {
            status: status.as_u16(),
            body,
        }
    }
}

pub fn retry_disposition(err: &CompletionError) -> RetryDisposition {
    match err {
        CompletionError::Network(_) => RetryDisposition::Retryable,
        CompletionError::Status { status, .. } => StatusCode::from_u16(*status)
            .map(classify_status)
            .unwrap_or(RetryDisposition::NonRetryable),
        CompletionError::Timeout(_) | CompletionError::Quota { .. } | CompletionError::EmptyResponse => {
            RetryDisposition::NonRetryable
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Completion requests allowed per second, with a burst allowance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    pub per_second: f64,
    pub burst: u32,
}

impl ThrottleConfig {
    /// `None` for a non-positive or non-finite rate.
    pub fn per_second(rate: f64) -> Option<Self> {
        (rate.is_finite() && rate > 0.0).then(|| Self {
            per_second: rate,
            burst: (rate.ceil() as u32).max(1),
        })
    }
}

/// Spaces completion calls of one client so that at most `per_second` start
/// each second once the burst is spent. Credit refills continuously.
#[derive(Debug)]
pub struct RequestThrottle {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
}

#[derive(Debug)]
struct ThrottleState {
    credit: f64,
    updated: Instant,
}

impl RequestThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let config = ThrottleConfig {
            burst: config.burst.max(1),
            ..config
        };
        Self {
            state: Mutex::new(ThrottleState {
                credit: f64::from(config.burst),
                updated: Instant::now(),
            }),
            config,
        }
    }

    /// Waits until a request may start.
    pub async fn acquire(&self) {
        let wait = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let refill = now.duration_since(state.updated).as_secs_f64() * self.config.per_second;
            state.credit = (state.credit + refill).min(f64::from(self.config.burst));
            state.updated = now;
            // Reserve the slot now; a negative balance is the queue behind us.
            state.credit -= 1.0;
            if state.credit >= 0.0 {
                return;
            }
            Duration::from_secs_f64(-state.credit / self.config.per_second)
        };
        tokio::time::sleep(wait).await;
    }
}
