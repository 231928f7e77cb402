//! # Booking Runtime
//!
//! Moves booking lifecycle events from the outside world through the pure
//! transition engine in `booking-core` and executes the resulting directives.
//!
//! ## Core Components
//!
//! - **Reconciler**: resolves the target booking, applies an event under
//!   optimistic concurrency, parks events whose prerequisite has not arrived
//!   and drains them once it has
//! - **Dispatcher**: executes scheduled directives exactly once against the
//!   payment, scheduling and notification providers
//! - **Coordinator**: the booking entrypoints (create, status, cancel)
//! - **Ingestion**: verifies and normalizes Calendly and Stripe webhooks
//! - **Recovery**: periodic sweep that repairs stalled bookings
//!
//! ## Example
//!
//! ```rust,ignore
//! use booking_runtime::{BookingCoordinator, CoordinatorConfig, Services};
//!
//! let coordinator = BookingCoordinator::new(services, CoordinatorConfig::default());
//! let view = coordinator.create(&principal, request).await?;
//! ```

use booking_core::anomaly::AnomalyReporter;
use booking_core::booking::ValidationError;
use booking_core::environment::{Clock, IdGenerator};
use booking_core::ids::BookingId;
use booking_core::machine::InvalidTransition;
use booking_core::pending::PendingEventQueue;
use booking_core::provider::{Notifier, PaymentProvider, SchedulingProvider};
use booking_core::refund::RefundPolicy;
use booking_core::store::{BookingStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod health;
pub mod ingestion;
pub mod reconciler;
pub mod recovery;

pub use config::{CoordinatorConfig, RecoveryConfig};
pub use coordinator::BookingCoordinator;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use ingestion::{IngestError, IngestOutcome, WebhookIngestor};
pub use reconciler::{Reconciler, SubmitOutcome};
pub use recovery::{RecoveryJob, SweepReport};
pub use retry::{RetryError, RetryPolicy};

/// Errors surfaced by the coordinator and its components.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// The booking does not exist.
    #[error("booking {0} not found")]
    NotFound(BookingId),

    /// The principal may not perform the operation.
    #[error("principal {principal} may not {action} booking {booking_id}")]
    Forbidden {
        /// Acting principal.
        principal: String,
        /// Attempted operation.
        action: &'static str,
        /// Target booking.
        booking_id: BookingId,
    },

    /// The principal may not create this booking.
    #[error("principal {0} may not create bookings for this client")]
    CreateForbidden(String),

    /// The creation request is malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The command does not apply to the booking's current state.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Every reload-and-recompute attempt lost the race.
    #[error("gave up on booking {booking_id} after {attempts} version conflicts")]
    ConflictRetriesExhausted {
        /// Contended booking.
        booking_id: BookingId,
        /// Attempts made.
        attempts: u32,
    },

    /// Persistence failed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

impl CoordinatorError {
    /// Whether the caller should retry later (store down, contention).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Unavailable(_)) | Self::ConflictRetriesExhausted { .. }
        )
    }
}

/// Collaborators shared by every runtime component.
///
/// Cloning is cheap; every field is reference counted.
#[derive(Clone)]
pub struct Services {
    /// Booking persistence.
    pub store: Arc<dyn BookingStore>,
    /// Parked-event queue.
    pub pending: Arc<dyn PendingEventQueue>,
    /// Anomaly sink.
    pub anomalies: Arc<dyn AnomalyReporter>,
    /// Payment provider.
    pub payments: Arc<dyn PaymentProvider>,
    /// Scheduling provider.
    pub scheduling: Arc<dyn SchedulingProvider>,
    /// Notification delivery.
    pub notifier: Arc<dyn Notifier>,
    /// Refund amount policy.
    pub refund_policy: Arc<dyn RefundPolicy>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Booking ID source.
    pub ids: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Report an anomaly, logging instead of failing when the sink is down.
///
/// Anomaly reporting never aborts the operation that observed the anomaly.
pub(crate) async fn report_anomaly(services: &Services, anomaly: booking_core::anomaly::Anomaly) {
    ::metrics::counter!("booking_anomalies_total", "kind" => anomaly.kind.as_str()).increment(1);
    tracing::warn!(
        kind = %anomaly.kind,
        booking_id = ?anomaly.booking_id,
        target = ?anomaly.target.as_ref().map(ToString::to_string),
        event = ?anomaly.event,
        detail = %anomaly.detail,
        "Anomaly reported"
    );
    if let Err(e) = services.anomalies.report(anomaly).await {
        tracing::error!(error = %e, "Failed to persist anomaly report");
    }
}
