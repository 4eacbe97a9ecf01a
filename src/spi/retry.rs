use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{ProviderError, RateLimitInfo};

/// Exponential backoff with jitter for retryable adapter errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound for any computed delay.
    pub max_delay_ms: u64,
    /// Random spread applied to each delay (0.0 - 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped, jittered.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = 2f64.powi(retry.min(30) as i32);
        let raw_ms = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let scale = 1.0 + (rand::random::<f64>() - 0.5) * 2.0 * jitter;
        Duration::from_millis((raw_ms * scale).max(0.0) as u64)
    }

    /// Delay before retrying after `err`; honours a provider's suggested wait.
    pub fn backoff(&self, retry: u32, err: &ProviderError) -> Duration {
        let computed = self.delay_for(retry);
        match err {
            ProviderError::RateLimited {
                retry_after: Some(hint),
                ..
            } => computed.max(*hint),
            _ => computed,
        }
    }
}

/// Why a guarded call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Retryable failures used up the attempt budget.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        last: ProviderError,
    },
    /// Non-retryable failure.
    Fatal(ProviderError),
    /// Run cancelled before or between attempts.
    Cancelled,
}

/// Spaces calls to one provider so its published request budget holds.
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    next: Option<Instant>,
}

impl Pacer {
    /// Pacer for `info`. Without usable hints every call goes straight through.
    ///
    /// A spent budget (`remaining == 0`) holds the first call until `reset_at`.
    pub fn new(info: Option<&RateLimitInfo>) -> Self {
        let interval = info
            .and_then(RateLimitInfo::min_interval)
            .unwrap_or(Duration::ZERO);
        let next = info
            .and_then(|i| i.exhausted_for(Utc::now()))
            .map(|wait| Instant::now() + wait);
        Self { interval, next }
    }

    /// Spacing enforced between calls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits for the next call slot. Returns false if `cancel` fired first.
    pub async fn ready(&mut self, cancel: &CancellationToken) -> bool {
        if let Some(at) = self.next {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(at) => {}
            }
        }
        if cancel.is_cancelled() {
            return false;
        }
        if !self.interval.is_zero() {
            self.next = Some(Instant::now() + self.interval);
        }
        true
    }
}

/// Runs `call` under a per-attempt timeout, retrying retryable errors.
///
/// Cancellation is honoured before each attempt and during backoff; an attempt
/// already in flight always runs to completion or timeout. A timeout counts as
/// [`ProviderError::Transient`]. `on_retry` sees `(attempt, delay, error)`
/// before each backoff sleep.
pub async fn guarded_call<T, F, Fut, R>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    cancel: &CancellationToken,
    mut on_retry: R,
    mut call: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
    R: FnMut(u32, Duration, &ProviderError),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        attempt += 1;

        let result = match tokio::time::timeout(call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Transient(format!(
                "call timed out after {} ms",
                call_timeout.as_millis()
            ))),
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(CallError::Fatal(err));
        }
        if attempt >= max_attempts {
            return Err(CallError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.backoff(attempt - 1, &err);
        on_retry(attempt, delay, &err);
        tokio::select! {
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
