//! Webhook ingestion.
//!
//! A delivery is verified, normalized into an [`EventEnvelope`] and handed
//! to the reconciler. The outcome is durable when [`WebhookIngestor::ingest`]
//! returns `Ok`, so the HTTP layer may acknowledge the delivery; an `Err`
//! tells it whether the provider should retry.

pub mod calendly;
pub mod signature;
pub mod stripe;

use crate::CoordinatorError;
use crate::coordinator::BookingCoordinator;
use crate::reconciler::SubmitOutcome;
use booking_core::event::{EventEnvelope, Provider};
use thiserror::Error;

pub use signature::{SignatureError, SignatureVerifier};

/// Result of normalizing a provider payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Normalized {
    /// A lifecycle event.
    Event(EventEnvelope),
    /// A delivery the coordinator does not act on.
    Ignored(String),
}

/// Why a delivery could not be ingested.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    /// The body is not a payload we understand.
    #[error("invalid payload: {0}")]
    Payload(String),

    /// The event could not be persisted.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// What happened to a delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event reached the reconciler.
    Submitted(SubmitOutcome),
    /// Nothing to do.
    Ignored(String),
}

impl IngestOutcome {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Submitted(outcome) => outcome.label(),
            Self::Ignored(_) => "ignored",
        }
    }
}

/// Verifies, normalizes and submits webhook deliveries.
#[derive(Clone, Debug)]
pub struct WebhookIngestor {
    coordinator: BookingCoordinator,
    calendly: SignatureVerifier,
    stripe: SignatureVerifier,
}

impl WebhookIngestor {
    /// Create an ingestor with one verifier per provider.
    #[must_use]
    pub const fn new(coordinator: BookingCoordinator, calendly: SignatureVerifier, stripe: SignatureVerifier) -> Self {
        Self {
            coordinator,
            calendly,
            stripe,
        }
    }

    /// Ingest one delivery.
    ///
    /// # Errors
    ///
    /// [`IngestError::Signature`] and [`IngestError::Payload`] are permanent;
    /// [`IngestError::Coordinator`] may be retryable (see
    /// [`CoordinatorError::is_retryable`]).
    #[tracing::instrument(skip(self, signature, body), fields(bytes = body.len()))]
    pub async fn ingest(
        &self,
        provider: Provider,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let result = self.ingest_inner(provider, signature, body).await;

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(IngestError::Signature(_)) => "bad_signature",
            Err(IngestError::Payload(_)) => "bad_payload",
            Err(IngestError::Coordinator(_)) => "error",
        };
        metrics::counter!(
            "booking_webhooks_total",
            "provider" => provider.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        match &result {
            Ok(o) => tracing::info!(outcome = o.label(), "Webhook ingested"),
            Err(IngestError::Signature(e)) => tracing::warn!(error = %e, "Webhook signature rejected"),
            Err(e) => tracing::warn!(error = %e, "Webhook not ingested"),
        }
        result
    }

    async fn ingest_inner(
        &self,
        provider: Provider,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let now = self.coordinator.services().clock.now();
        let normalized = match provider {
            Provider::Calendly => {
                self.calendly.verify(signature, body, now)?;
                calendly::normalize(body, now)?
            },
            Provider::Stripe => {
                self.stripe.verify(signature, body, now)?;
                stripe::normalize(body, now)?
            },
        };

        match normalized {
            Normalized::Event(envelope) => {
                let outcome = self.coordinator.submit(envelope).await?;
                Ok(IngestOutcome::Submitted(outcome))
            },
            Normalized::Ignored(reason) => {
                tracing::debug!(%reason, "Delivery ignored");
                Ok(IngestOutcome::Ignored(reason))
            },
        }
    }

    /// The coordinator deliveries are submitted to.
    #[must_use]
    pub const fn coordinator(&self) -> &BookingCoordinator {
        &self.coordinator
    }
}
