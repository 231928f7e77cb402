//! Backoff for provider calls made while executing directives.
//!
//! A provider error is either transient (timeout, 5xx, 429) or permanent (the
//! provider refused the request). [`retry_with_predicate`] sleeps and tries
//! again on the first kind and stops at once on the second. The directive key
//! travels with every attempt, so a retried call that already reached the
//! provider is deduplicated on its side.
//!
//! ```rust
//! use booking_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(4)
//!     .initial_delay(Duration::from_millis(250))
//!     .build();
//!
//! let session = retry_with_predicate(
//!     &policy,
//!     || async { Ok::<_, String>("cs_123") },
//!     |err: &String| err.starts_with("503"),
//! )
//! .await?;
//! assert_eq!(session, "cs_123");
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// How often and how patiently a provider call is retried.
///
/// Defaults: 3 retries, 200ms first delay doubling up to 10s, 20% jitter and
/// a 10s deadline per attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Share of each delay that may be randomly cut, in `[0, 1]`.
    pub jitter: f64,
    /// Deadline of one attempt; enforced by the caller.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Start from the defaults.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: RetryPolicy {
                max_retries: 3,
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(10),
                multiplier: 2.0,
                jitter: 0.2,
                attempt_timeout: Duration::from_secs(10),
            },
        }
    }

    /// Total attempts, the first one included.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after failed attempt number `retry` (zero-based), before jitter.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if nanos.is_finite() && nanos < self.max_delay.as_nanos() as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            self.max_delay
        }
    }

    /// [`delay_for_attempt`](Self::delay_for_attempt) shortened by a random
    /// share of at most `jitter`, so that retries from concurrent dispatchers
    /// spread out.
    #[must_use]
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let delay = self.delay_for_attempt(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return delay;
        }
        delay.mul_f64(1.0 - rand::thread_rng().gen_range(0.0..jitter))
    }
}

/// Adjusts a [`RetryPolicy`] starting from its defaults.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Retries after the first attempt.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Upper bound on any delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Growth factor between delays.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Random share cut from each delay.
    #[must_use]
    pub const fn jitter(mut self, jitter: f64) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Deadline of one attempt.
    #[must_use]
    pub const fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.policy.attempt_timeout = timeout;
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Why a retried operation ultimately failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: E,
    },
    /// An attempt failed with an error that retrying cannot fix.
    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent {
        /// Attempts made, including the failing one.
        attempts: u32,
        /// The error.
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Permanent { attempts, .. } => *attempts,
        }
    }

    /// The last error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Permanent { error, .. } => error,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or the policy's
/// attempts run out. Only errors `is_retryable` accepts are retried.
///
/// Callers bound each attempt with `policy.attempt_timeout` themselves so the
/// timeout maps onto their own error type.
///
/// # Errors
///
/// [`RetryError::Permanent`] on the first non-retryable error,
/// [`RetryError::Exhausted`] once every attempt failed.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(attempts, "Provider call recovered");
                }
                return Ok(value);
            },
            Err(error) => error,
        };

        if !is_retryable(&error) {
            return Err(RetryError::Permanent { attempts, error });
        }
        if attempts >= max_attempts {
            return Err(RetryError::Exhausted { attempts, last: error });
        }

        let delay = policy.jittered_delay(attempts - 1);
        tracing::debug!(attempts, ?delay, %error, "Transient provider failure, backing off");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .jitter(0.0)
            .build()
    }

    #[test]
    fn delays_double_until_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .build();

        let delays: Vec<_> = (0..5).map(|n| policy.delay_for_attempt(n)).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 500, 500].map(Duration::from_millis)
        );
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn jitter_never_lengthens_a_delay() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .jitter(0.5)
            .build();
        for _ in 0..50 {
            let delay = policy.jittered_delay(0);
            assert!((Duration::from_millis(50)..=Duration::from_millis(100)).contains(&delay));
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);

        let result = retry_with_predicate(
            &quick(3),
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 { Err(format!("503 on call {call}")) } else { Ok("cs_1") }
                }
            },
            |_: &String| true,
        )
        .await;

        assert_eq!(result, Ok("cs_1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn outage_exhausts_every_attempt() {
        let result: Result<(), _> = retry_with_predicate(
            &quick(2),
            || async { Err::<(), _>("503".to_string()) },
            |_: &String| true,
        )
        .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: "503".to_string()
            })
        );
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_predicate(
            &quick(5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("400 no such price".to_string()) }
            },
            |err: &String| err.starts_with("503"),
        )
        .await;

        assert_eq!(result.map_err(|e| e.attempts()), Err(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
