//! Exponential backoff shared by reconnects, send retries and persistence.
//!
//! Stateless: all logic lives in associated functions that take the
//! [`RetryPolicy`] as a parameter. Attempts are 1-based.

use std::future::Future;
use std::time::Duration;

use courier_types::config::RetryPolicy;
use rand::Rng;

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.max_attempts
    }

    /// Backoff before the attempt following `attempt`, without jitter.
    ///
    /// `min(base * 2^(attempt-1), max)`.
    pub fn backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u64 << exponent;
        let millis = policy.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(policy.max_delay_ms))
    }

    /// Backoff with the policy's jitter applied, still capped at `max_delay`.
    pub fn delay_for(policy: &RetryPolicy, attempt: u32) -> Duration {
        let backoff = Self::backoff(policy, attempt);
        let jitter = policy.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || backoff.is_zero() {
            return backoff;
        }
        let spread = rand::rng().random_range(-jitter..=jitter);
        backoff.mul_f64(1.0 + spread).min(policy.max_delay())
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// policy runs out of attempts. Returns the last error on failure.
    pub async fn run<T, E, F, Fut>(
        policy: &RetryPolicy,
        operation: &str,
        is_transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && Self::should_retry(policy, attempt) => {
                    let delay = Self::delay_for(policy, attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
