//! Periodic recovery sweep.
//!
//! Webhooks are the primary signal; this job is the backstop for the ones
//! that never arrive. Each sweep queries the providers for bookings that sat
//! too long in a waiting state, manufactures the missing events, re-drives
//! directives that are still scheduled and retries parked events. Every
//! booking is handled on its own: a provider error for one booking is logged
//! and counted, and the next booking proceeds.

use crate::config::RecoveryConfig;
use crate::coordinator::BookingCoordinator;
use crate::reconciler::SubmitOutcome;
use crate::CoordinatorError;
use booking_core::booking::{Booking, BookingState};
use booking_core::event::{BookingEvent, EventEnvelope, EventOrigin};
use booking_core::ids::{CorrelationKey, IdempotencyKey};
use booking_core::provider::{PaymentStatus, ProviderError, SchedulingStatus};
use booking_core::store::BookingFilter;
use std::future::Future;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Target of the synthetic-event audit log.
pub const SYNTHETIC_TARGET: &str = "booking::recovery::synthetic";

/// Counts from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Bookings inspected.
    pub examined: usize,
    /// Synthetic events that changed a booking.
    pub synthetic_applied: usize,
    /// Synthetic events that turned out to be unnecessary.
    pub synthetic_unchanged: usize,
    /// Directives executed by re-drives.
    pub directives_executed: usize,
    /// Parked events re-evaluated.
    pub parked_retried: usize,
    /// Provider calls that failed; retried next sweep.
    pub provider_errors: usize,
    /// Bookings whose recovery failed for another reason.
    pub failures: usize,
}

/// The recovery job.
#[derive(Clone, Debug)]
pub struct RecoveryJob {
    coordinator: BookingCoordinator,
    config: RecoveryConfig,
}

impl RecoveryJob {
    /// Create the job.
    #[must_use]
    pub const fn new(coordinator: BookingCoordinator, config: RecoveryConfig) -> Self {
        Self { coordinator, config }
    }

    /// Run sweeps every `config.interval` until `shutdown` resolves.
    ///
    /// A sweep in progress when shutdown is requested runs to completion.
    pub fn spawn<S>(self, shutdown: S) -> JoinHandle<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tokio::pin!(shutdown);

            tracing::info!(interval_secs = self.config.interval.as_secs(), "Recovery job started");
            loop {
                tokio::select! {
                    () = &mut shutdown => {
                        tracing::info!("Recovery job stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.sweep().await;
                        tracing::info!(?report, "Recovery sweep finished");
                    }
                }
            }
        })
    }

    /// Run one sweep.
    pub async fn sweep(&self) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();

        self.sweep_pending(&mut report).await;
        self.sweep_payments(&mut report).await;
        self.sweep_completions(&mut report).await;
        self.sweep_directives(&mut report).await;
        self.sweep_parked(&mut report).await;

        metrics::counter!("booking_recovery_sweeps_total").increment(1);
        metrics::histogram!("booking_recovery_sweep_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        #[allow(clippy::cast_precision_loss)]
        let failures = (report.failures + report.provider_errors) as f64;
        metrics::gauge!("booking_recovery_last_sweep_failures").set(failures);
        report
    }

    async fn candidates(&self, filter: BookingFilter, report: &mut SweepReport) -> Vec<Booking> {
        match self
            .coordinator
            .services()
            .store
            .find(filter, self.config.batch_size)
            .await
        {
            Ok(bookings) => {
                report.examined += bookings.len();
                bookings
            },
            Err(e) => {
                tracing::error!(error = %e, "Recovery query failed");
                report.failures += 1;
                Vec::new()
            },
        }
    }

    /// `PENDING` bookings the scheduling webhook never arrived for.
    async fn sweep_pending(&self, report: &mut SweepReport) {
        let now = self.coordinator.services().clock.now();
        let filter = BookingFilter::new()
            .with_states([BookingState::Pending])
            .idle_since(now - self.config.pending_timeout);

        for booking in self.candidates(filter, report).await {
            let status = self.coordinator.services().scheduling.lookup(&booking).await;
            let event = match status {
                Ok(SchedulingStatus::Scheduled {
                    scheduling_ref,
                    start,
                    end,
                }) => BookingEvent::SchedulingConfirmed {
                    scheduling_ref,
                    start,
                    end,
                },
                Ok(SchedulingStatus::Cancelled { reason }) => BookingEvent::SchedulingCancelled { reason },
                Ok(SchedulingStatus::NotFound) => BookingEvent::CancellationRequested {
                    reason: "scheduling never completed".to_string(),
                    requested_by: None,
                },
                Err(e) => {
                    provider_error(&booking, &e, report);
                    continue;
                },
            };
            self.synthesize(&booking, event, report).await;
        }
    }

    /// `AWAITING_PAYMENT` and `PAYMENT_FAILED` bookings without a recent signal.
    async fn sweep_payments(&self, report: &mut SweepReport) {
        let now = self.coordinator.services().clock.now();
        let filter = BookingFilter::new()
            .with_states([BookingState::AwaitingPayment, BookingState::PaymentFailed])
            .idle_since(now - self.config.awaiting_payment_timeout);

        for booking in self.candidates(filter, report).await {
            if booking.state == BookingState::PaymentFailed
                && booking.last_transition_at < now - self.config.payment_failed_abandon_after
            {
                let event = BookingEvent::CancellationRequested {
                    reason: "payment abandoned".to_string(),
                    requested_by: None,
                };
                self.synthesize(&booking, event, report).await;
                continue;
            }

            let Some(payment_ref) = booking.external_payment_ref.clone() else {
                // The session was never created; its directive is still scheduled.
                self.redrive(&booking, report).await;
                continue;
            };

            let status = self
                .coordinator
                .services()
                .payments
                .payment_status(&payment_ref)
                .await;
            let event = match status {
                Ok(PaymentStatus::Paid { amount }) => BookingEvent::PaymentSucceeded {
                    payment_ref: Some(payment_ref),
                    amount,
                },
                Ok(PaymentStatus::Failed { reason }) if booking.state == BookingState::AwaitingPayment => {
                    BookingEvent::PaymentFailed { reason }
                },
                Ok(PaymentStatus::Expired) => BookingEvent::PaymentSessionExpired { payment_ref },
                Ok(PaymentStatus::Open | PaymentStatus::Failed { .. }) => continue,
                Err(e) => {
                    provider_error(&booking, &e, report);
                    continue;
                },
            };
            self.synthesize(&booking, event, report).await;
        }
    }

    /// `CONFIRMED` bookings whose session ended.
    async fn sweep_completions(&self, report: &mut SweepReport) {
        let now = self.coordinator.services().clock.now();
        let filter = BookingFilter::new()
            .with_states([BookingState::Confirmed])
            .ended_before(now - self.config.completion_grace);

        for booking in self.candidates(filter, report).await {
            self.synthesize(&booking, BookingEvent::SessionCompleted, report)
                .await;
        }
    }

    /// Bookings with directives that were scheduled but never ran.
    async fn sweep_directives(&self, report: &mut SweepReport) {
        let filter = BookingFilter::new().with_scheduled_directives();
        for booking in self.candidates(filter, report).await {
            self.redrive(&booking, report).await;
        }
    }

    async fn sweep_parked(&self, report: &mut SweepReport) {
        let services = self.coordinator.services();
        let older_than = services.clock.now() - self.config.parked_retry_after;
        let parked = match services
            .pending
            .take_stale(older_than, self.config.batch_size)
            .await
        {
            Ok(parked) => parked,
            Err(e) => {
                tracing::error!(error = %e, "Parked-event query failed");
                report.failures += 1;
                return;
            },
        };

        for event in parked {
            report.parked_retried += 1;
            match self.coordinator.reconciler().retry_parked(event).await {
                Ok(outcome) => self.dispatch_after(&outcome, report).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Parked event retry failed");
                    report.failures += 1;
                },
            }
        }
    }

    /// Submit a synthetic event for `booking` and dispatch what it schedules.
    async fn synthesize(&self, booking: &Booking, event: BookingEvent, report: &mut SweepReport) {
        let kind = event.kind();
        let key = IdempotencyKey::new(format!(
            "synthetic:{}:{kind}:{}",
            booking.id,
            booking.state_history.len()
        ));
        tracing::info!(
            target: SYNTHETIC_TARGET,
            booking_id = %booking.id,
            state = %booking.state,
            event = %kind,
            idempotency_key = %key,
            "Synthetic event"
        );
        metrics::counter!("booking_synthetic_events_total", "event" => kind.as_str()).increment(1);

        let envelope = EventEnvelope::new(
            key,
            CorrelationKey::Booking(booking.id),
            event,
            EventOrigin::Synthetic,
            self.coordinator.services().clock.now(),
        );
        match self.coordinator.submit(envelope).await {
            Ok(outcome) => {
                if matches!(outcome, SubmitOutcome::Applied { .. }) {
                    report.synthetic_applied += 1;
                } else {
                    report.synthetic_unchanged += 1;
                }
                self.dispatch_after(&outcome, report).await;
            },
            Err(e) => {
                record_failure(booking, &e, report);
            },
        }
    }

    async fn dispatch_after(&self, outcome: &SubmitOutcome, report: &mut SweepReport) {
        if let Some(booking_id) = outcome.dispatch_target() {
            match self.coordinator.dispatch(booking_id).await {
                Ok(dispatched) => report.directives_executed += dispatched.executed,
                Err(e) => {
                    tracing::warn!(%booking_id, error = %e, "Dispatch after recovery failed");
                    report.failures += 1;
                },
            }
        }
    }

    async fn redrive(&self, booking: &Booking, report: &mut SweepReport) {
        if booking.scheduled_directives().next().is_none() {
            return;
        }
        match self.coordinator.dispatch(booking.id).await {
            Ok(dispatched) => report.directives_executed += dispatched.executed,
            Err(e) => record_failure(booking, &e, report),
        }
    }
}

fn provider_error(booking: &Booking, error: &ProviderError, report: &mut SweepReport) {
    tracing::warn!(booking_id = %booking.id, %error, "Provider unavailable during recovery");
    report.provider_errors += 1;
}

fn record_failure(booking: &Booking, error: &CoordinatorError, report: &mut SweepReport) {
    tracing::warn!(booking_id = %booking.id, %error, "Recovery failed for booking");
    report.failures += 1;
}
