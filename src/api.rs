//! Outbound request abstraction with bounded exponential backoff.
//!
//! Every remote call in the pipeline (a NewsData page, a chat completion)
//! goes through the same two pieces:
//!
//! - [`FetchAsync`]: one attempt at a request, no retry logic
//! - [`RetryFetch`]: decorator that re-attempts transient failures
//!
//! # Retry Strategy
//!
//! - Only errors for which [`IngestError::is_retryable`] holds are retried
//! - Exponential backoff starting at `base_delay`, capped at `max_delay`
//! - A provider `Retry-After` replaces the computed delay (still capped)
//! - Random jitter (0-250ms) added on top
//! - Gives up after `max_retries` re-attempts and returns the last error

use crate::error::{IngestError, Result};
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// A single attempt at a remote request.
///
/// Implementors perform exactly one round trip. Decorators such as
/// [`RetryFetch`] add policy on top.
pub trait FetchAsync {
    /// What the caller hands in for each attempt.
    type Request: ?Sized;
    /// What a successful attempt produces.
    type Response;

    async fn fetch(&self, request: &Self::Request) -> Result<Self::Response>;
}

/// Backoff parameters for [`RetryFetch`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of re-attempts after the first failure.
    pub max_retries: usize,
    /// Initial delay between attempts (doubles each time).
    pub base_delay: StdDuration,
    /// Upper bound for any single delay.
    pub max_delay: StdDuration,
    /// Upper bound of the random jitter, in milliseconds.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(30),
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Delay before re-attempt number `attempt` (1-based).
    ///
    /// ```text
    /// delay = min(retry_after or base_delay * 2^(attempt-1), max_delay) + jitter
    /// ```
    pub fn delay_for(&self, attempt: usize, retry_after: Option<StdDuration>) -> StdDuration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        let computed = self.base_delay.saturating_mul(1u32 << shift);
        let delay = retry_after.unwrap_or(computed).min(self.max_delay);
        let jitter_ms: u64 = if self.jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=self.jitter_ms)
        };
        delay + StdDuration::from_millis(jitter_ms)
    }
}

/// Wrapper that adds bounded retry with backoff to any [`FetchAsync`].
pub struct RetryFetch<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> RetryFetch<T>
where
    T: FetchAsync,
{
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.policy.max_retries)
            .field("base_delay", &self.policy.base_delay)
            .field("max_delay", &self.policy.max_delay)
            .finish()
    }
}

impl<T> FetchAsync for RetryFetch<T>
where
    T: FetchAsync,
{
    type Request = T::Request;
    type Response = T::Response;

    #[instrument(level = "debug", skip_all)]
    async fn fetch(&self, request: &Self::Request) -> Result<Self::Response> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.fetch(request).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_retryable() {
                        error!(
                            attempt,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            error = %e,
                            "request failed with a non-retryable error"
                        );
                        return Err(e);
                    }

                    if attempt > self.policy.max_retries {
                        error!(
                            attempt,
                            max = self.policy.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "request exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.policy.delay_for(attempt, e.retry_after());
                    warn!(
                        attempt,
                        max = self.policy.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "request attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Convenience for pulling a `Retry-After` header off a response.
pub fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<StdDuration> {
    crate::error::parse_retry_after(
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok()),
    )
}

/// Map a response status into `Ok(response)` or a classified [`IngestError`].
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = retry_after_header(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(IngestError::from_status(
        status,
        retry_after,
        &crate::utils::truncate_for_log(&body, 300),
    ))
}
