//! Booking entrypoints.
//!
//! [`BookingCoordinator`] is what the HTTP layer talks to. Creation and
//! status reads touch the store directly; cancellation goes through the
//! reconciler like any other event so that it races safely with webhooks.

use crate::config::CoordinatorConfig;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::reconciler::{Reconciler, SubmitOutcome};
use crate::{CoordinatorError, Services};
use booking_core::booking::{Booking, BookingState, BookingView, CancellationStatus, NewBooking};
use booking_core::event::{BookingEvent, EventEnvelope, EventKind, EventOrigin};
use booking_core::ids::{BookingId, CorrelationKey, IdempotencyKey, Version};
use booking_core::machine::{InvalidTransition, Rejection};
use booking_core::principal::Principal;
use serde::{Deserialize, Serialize};

/// Result of the cancellation entrypoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReceipt {
    /// Cancelled booking.
    pub booking_id: BookingId,
    /// `CANCELLED`, or `CANCELLATION_PENDING` while a refund is outstanding.
    pub state: CancellationStatus,
}

/// Facade over the reconciler and dispatcher.
#[derive(Clone, Debug)]
pub struct BookingCoordinator {
    services: Services,
    reconciler: Reconciler,
    dispatcher: Dispatcher,
}

impl BookingCoordinator {
    /// Wire the components.
    #[must_use]
    pub fn new(services: Services, config: CoordinatorConfig) -> Self {
        let dispatcher = Dispatcher::new(
            services.clone(),
            config.directive_retry.clone(),
            config.max_conflict_retries,
        );
        let reconciler = Reconciler::new(services.clone(), config);
        Self {
            services,
            reconciler,
            dispatcher,
        }
    }

    /// Shared collaborators.
    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    /// The event reconciler.
    #[must_use]
    pub const fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// The directive dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Create a booking in `PENDING`.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::CreateForbidden`] if the principal may not book for
    /// the client, [`CoordinatorError::Validation`] for a malformed request,
    /// [`CoordinatorError::Store`] on persistence failure.
    #[tracing::instrument(skip(self, principal, request), fields(principal = %principal.id))]
    pub async fn create(&self, principal: &Principal, request: NewBooking) -> Result<BookingView, CoordinatorError> {
        if !principal.can_create(&request) {
            return Err(CoordinatorError::CreateForbidden(principal.id.clone()));
        }
        request.validate()?;

        let booking = Booking::create(self.services.ids.booking_id(), request, self.services.clock.now());
        self.services.store.save(&booking, Version::INITIAL).await?;

        metrics::counter!("booking_created_total").increment(1);
        tracing::info!(
            booking_id = %booking.id,
            client_id = %booking.client_id,
            builder_id = %booking.builder_id,
            "Booking created"
        );
        Ok(booking.view())
    }

    /// Read the booking projection.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::NotFound`] or [`CoordinatorError::Forbidden`].
    pub async fn status(&self, principal: &Principal, booking_id: BookingId) -> Result<BookingView, CoordinatorError> {
        let booking = self.services.store.load(booking_id).await?;
        if !principal.can_view(&booking) {
            return Err(forbidden(principal, "view", booking_id));
        }
        Ok(booking.view())
    }

    /// Cancel a booking and attempt any refund before returning.
    ///
    /// Cancelling an already cancelled booking returns its current status.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::InvalidTransition`] for a completed booking, plus
    /// the errors of [`status`](Self::status) and [`submit`](Self::submit).
    #[tracing::instrument(skip(self, principal, reason), fields(principal = %principal.id))]
    pub async fn cancel(
        &self,
        principal: &Principal,
        booking_id: BookingId,
        reason: String,
    ) -> Result<CancellationReceipt, CoordinatorError> {
        let booking = self.services.store.load(booking_id).await?;
        if !principal.can_cancel(&booking) {
            return Err(forbidden(principal, "cancel", booking_id));
        }
        if booking.state == BookingState::Completed {
            return Err(terminal(BookingState::Completed));
        }

        if booking.state != BookingState::Cancelled {
            let envelope = EventEnvelope::new(
                IdempotencyKey::new(format!("cancel:{booking_id}")),
                CorrelationKey::Booking(booking_id),
                BookingEvent::CancellationRequested {
                    reason,
                    requested_by: Some(principal.id.clone()),
                },
                EventOrigin::Command,
                self.services.clock.now(),
            );
            let outcome = self.reconciler.submit(envelope).await?;
            if let SubmitOutcome::Rejected { rejection, .. } = outcome {
                let current = self.services.store.load(booking_id).await?;
                return Err(InvalidTransition {
                    from: current.state,
                    event: EventKind::CancellationRequested,
                    rejection,
                }
                .into());
            }
        }

        // A failed refund leaves the booking in CANCELLATION_PENDING; the
        // recovery job retries only what is still scheduled.
        if let Err(e) = self.dispatcher.dispatch(booking_id).await {
            tracing::warn!(%booking_id, error = %e, "Dispatch after cancellation failed");
        }

        let current = self.services.store.load(booking_id).await?;
        match current.cancellation_status() {
            Some(state) => Ok(CancellationReceipt { booking_id, state }),
            None => Err(terminal(current.state)),
        }
    }

    /// Apply an inbound event.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::submit`].
    pub async fn submit(&self, envelope: EventEnvelope) -> Result<SubmitOutcome, CoordinatorError> {
        self.reconciler.submit(envelope).await
    }

    /// Execute the booking's scheduled directives.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch`].
    pub async fn dispatch(&self, booking_id: BookingId) -> Result<DispatchReport, CoordinatorError> {
        self.dispatcher.dispatch(booking_id).await
    }
}

fn forbidden(principal: &Principal, action: &'static str, booking_id: BookingId) -> CoordinatorError {
    tracing::warn!(principal = %principal.id, action, %booking_id, "Access denied");
    CoordinatorError::Forbidden {
        principal: principal.id.clone(),
        action,
        booking_id,
    }
}

fn terminal(from: BookingState) -> CoordinatorError {
    InvalidTransition {
        from,
        event: EventKind::CancellationRequested,
        rejection: Rejection::Terminal,
    }
    .into()
}
