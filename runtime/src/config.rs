//! Coordinator and recovery job configuration.
//!
//! Values are supplied by the application (see the server's `Config::from_env`);
//! defaults match the production thresholds.

use crate::retry::RetryPolicy;
use chrono::Duration;

/// Configuration of the coordinator, reconciler and dispatcher.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Reload-and-recompute attempts after a version conflict.
    ///
    /// Default: 5
    pub max_conflict_retries: u32,

    /// Re-evaluations of a parked event before it is dropped and reported.
    ///
    /// Default: 20
    pub max_parked_attempts: u32,

    /// Retry policy for directive execution.
    pub directive_retry: RetryPolicy,
}

impl CoordinatorConfig {
    /// Create configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_conflict_retries: 5,
            max_parked_attempts: 20,
            directive_retry: RetryPolicy::default(),
        }
    }

    /// Set the conflict retry budget.
    #[must_use]
    pub const fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Set the parked-event attempt budget.
    #[must_use]
    pub const fn with_max_parked_attempts(mut self, attempts: u32) -> Self {
        self.max_parked_attempts = attempts;
        self
    }

    /// Set the directive retry policy.
    #[must_use]
    pub fn with_directive_retry(mut self, policy: RetryPolicy) -> Self {
        self.directive_retry = policy;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of the recovery job.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Time between sweeps.
    ///
    /// Default: 5 minutes
    pub interval: std::time::Duration,

    /// Age after which a `PENDING` booking is checked with the scheduling provider.
    ///
    /// Default: 24 hours
    pub pending_timeout: Duration,

    /// Age after which `AWAITING_PAYMENT` and `PAYMENT_FAILED` bookings are
    /// checked with the payment provider.
    ///
    /// Default: 15 minutes
    pub awaiting_payment_timeout: Duration,

    /// Age after which a `PAYMENT_FAILED` booking is cancelled.
    ///
    /// Default: 48 hours
    pub payment_failed_abandon_after: Duration,

    /// Time after `scheduled_end` before a `CONFIRMED` booking is completed.
    ///
    /// Default: 1 hour
    pub completion_grace: Duration,

    /// Age after which a parked event is retried by the sweep.
    ///
    /// Default: 5 minutes
    pub parked_retry_after: Duration,

    /// Maximum bookings examined per sweep step.
    ///
    /// Default: 200
    pub batch_size: usize,
}

impl RecoveryConfig {
    /// Create configuration with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval: std::time::Duration::from_secs(300),
            pending_timeout: Duration::hours(24),
            awaiting_payment_timeout: Duration::minutes(15),
            payment_failed_abandon_after: Duration::hours(48),
            completion_grace: Duration::hours(1),
            parked_retry_after: Duration::minutes(5),
            batch_size: 200,
        }
    }

    /// Set the sweep interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the `PENDING` threshold.
    #[must_use]
    pub const fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    /// Set the payment threshold.
    #[must_use]
    pub const fn with_awaiting_payment_timeout(mut self, timeout: Duration) -> Self {
        self.awaiting_payment_timeout = timeout;
        self
    }

    /// Set the abandonment threshold.
    #[must_use]
    pub const fn with_payment_failed_abandon_after(mut self, after: Duration) -> Self {
        self.payment_failed_abandon_after = after;
        self
    }

    /// Set the completion grace period.
    #[must_use]
    pub const fn with_completion_grace(mut self, grace: Duration) -> Self {
        self.completion_grace = grace;
        self
    }

    /// Set the parked-event retry age.
    #[must_use]
    pub const fn with_parked_retry_after(mut self, after: Duration) -> Self {
        self.parked_retry_after = after;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self::new()
    }
}
