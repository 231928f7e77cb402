//! Application state for Axum handlers.

use booking_runtime::ingestion::SignatureVerifier;
use booking_runtime::{BookingCoordinator, WebhookIngestor};

/// Parked-event backlog above which readiness reports degraded.
pub const DEFAULT_PARKED_THRESHOLD: usize = 1_000;

/// State shared across all HTTP handlers.
///
/// Cloning is cheap; the coordinator and ingestor share their collaborators.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Booking entrypoints.
    pub coordinator: BookingCoordinator,
    /// Webhook verification and submission.
    pub ingestor: WebhookIngestor,
    /// Parked-event backlog tolerated by the readiness check.
    pub parked_threshold: usize,
}

impl AppState {
    /// Build the state with one signature verifier per provider.
    #[must_use]
    pub fn new(coordinator: BookingCoordinator, calendly: SignatureVerifier, stripe: SignatureVerifier) -> Self {
        let ingestor = WebhookIngestor::new(coordinator.clone(), calendly, stripe);
        Self {
            coordinator,
            ingestor,
            parked_threshold: DEFAULT_PARKED_THRESHOLD,
        }
    }

    /// Override the readiness backlog threshold.
    #[must_use]
    pub const fn with_parked_threshold(mut self, threshold: usize) -> Self {
        self.parked_threshold = threshold;
        self
    }
}
