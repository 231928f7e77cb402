//! Executes scheduled directives against external providers.
//!
//! The booking's ledger is the source of truth: a directive runs only while
//! its entry is `Scheduled`, the entry's key doubles as the provider's
//! idempotency key, and the outcome is written back under optimistic
//! concurrency. A dispatcher that crashes between the provider call and the
//! write re-runs the call with the same key and gets the original result.

use crate::retry::{RetryError, RetryPolicy, retry_with_predicate};
use crate::{CoordinatorError, Services, report_anomaly};
use booking_core::anomaly::{Anomaly, AnomalyKind};
use booking_core::booking::{Booking, BookingError, BookingState, PaymentState};
use booking_core::directive::{Directive, DirectiveOutcome, DirectiveRecord};
use booking_core::ids::{BookingId, DirectiveKey};
use booking_core::money::Money;
use booking_core::provider::{PaymentSessionRequest, PaymentStatus, ProviderError, RefundRequest};
use std::future::Future;
use std::time::Instant;

/// Counts from one dispatch pass over a booking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Directives executed and recorded.
    pub executed: usize,
    /// Directives another dispatcher recorded first.
    pub skipped: usize,
    /// Directives recorded as failed.
    pub failed: usize,
}

/// Directive dispatcher.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    services: Services,
    policy: RetryPolicy,
    max_conflict_retries: u32,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new(services: Services, policy: RetryPolicy, max_conflict_retries: u32) -> Self {
        Self {
            services,
            policy,
            max_conflict_retries,
        }
    }

    /// Run every scheduled directive of `booking_id`, in scheduling order.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] if the booking cannot be loaded or an
    /// outcome cannot be persisted. Provider failures are not errors: they
    /// are recorded in the ledger and reported as anomalies.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch(&self, booking_id: BookingId) -> Result<DispatchReport, CoordinatorError> {
        let booking = self.services.store.load(booking_id).await?;
        let scheduled: Vec<DirectiveRecord> = booking.scheduled_directives().cloned().collect();
        let mut report = DispatchReport::default();

        for record in scheduled {
            // Reload so each directive sees the outcomes of the ones before it.
            let booking = self.services.store.load(booking_id).await?;
            if !booking.directive(&record.key).is_some_and(DirectiveRecord::is_scheduled) {
                report.skipped += 1;
                continue;
            }

            let started = Instant::now();
            let result = self.execute(&booking, &record).await;
            metrics::histogram!(
                "booking_directive_duration_seconds",
                "directive" => record.directive.name()
            )
            .record(started.elapsed().as_secs_f64());

            match result {
                Ok(outcome) => {
                    if self.record_outcome(booking_id, &record, outcome).await? {
                        report.executed += 1;
                    } else {
                        report.skipped += 1;
                    }
                },
                Err(failure) => {
                    self.record_failure(booking_id, &record, &failure).await?;
                    report.failed += 1;
                },
            }
        }

        Ok(report)
    }

    /// Perform one directive and return its outcome.
    async fn execute(&self, booking: &Booking, record: &DirectiveRecord) -> Result<DirectiveOutcome, Failure> {
        let key = &record.key;
        match &record.directive {
            Directive::CreatePaymentSession => {
                if !matches!(
                    booking.state,
                    BookingState::AwaitingPayment | BookingState::PaymentFailed
                ) || booking.payment_state.was_captured()
                {
                    return Ok(DirectiveOutcome::Superseded);
                }
                let request = PaymentSessionRequest {
                    booking_id: booking.id,
                    client_id: booking.client_id.clone(),
                    session_type_id: booking.session_type_id.clone(),
                    idempotency_key: key.clone(),
                };
                let session = self
                    .call(key, || self.services.payments.create_session(request.clone()))
                    .await?;
                Ok(DirectiveOutcome::PaymentSessionCreated {
                    payment_ref: session.payment_ref,
                    checkout_url: session.checkout_url,
                })
            },
            Directive::IssueRefundIfPaid => self.refund(booking, key).await,
            Directive::SendConfirmation | Directive::UpdateScheduleRef
                if booking.state == BookingState::Cancelled =>
            {
                Ok(DirectiveOutcome::Superseded)
            },
            Directive::NotifyClient { .. } if booking.state != BookingState::PaymentFailed => {
                Ok(DirectiveOutcome::Superseded)
            },
            Directive::SendConfirmation => {
                self.call(key, || self.services.notifier.send_confirmation(booking, key))
                    .await?;
                Ok(DirectiveOutcome::Delivered)
            },
            Directive::NotifyClient { reason } => {
                self.call(key, || self.services.notifier.notify_client(booking, *reason, key))
                    .await?;
                Ok(DirectiveOutcome::Delivered)
            },
            Directive::UpdateScheduleRef => {
                self.call(key, || self.services.notifier.schedule_updated(booking, key))
                    .await?;
                Ok(DirectiveOutcome::Delivered)
            },
        }
    }

    async fn refund(&self, booking: &Booking, key: &DirectiveKey) -> Result<DirectiveOutcome, Failure> {
        // At most one refund per booking, however many refund directives ran.
        if booking.payment_state != PaymentState::Paid || booking.refund_amount.is_some() {
            return Ok(DirectiveOutcome::RefundNotRequired);
        }
        let Some(payment_ref) = booking.external_payment_ref.clone() else {
            return Err(Failure::permanent("payment captured without a payment reference"));
        };

        let paid = match &booking.amount_paid {
            Some(amount) => amount.clone(),
            None => self.captured_amount(&payment_ref, key).await?,
        };

        let amount = if booking.captured_after_cancellation() {
            paid
        } else {
            let cancelled_at = booking.cancelled_at().unwrap_or(booking.last_transition_at);
            self.services
                .refund_policy
                .refund_amount(booking, &paid, cancelled_at)
        };
        if amount.is_zero() {
            tracing::info!(booking_id = %booking.id, "Refund policy grants nothing");
            return Ok(DirectiveOutcome::RefundNotRequired);
        }

        let request = RefundRequest {
            payment_ref,
            amount,
            idempotency_key: key.clone(),
        };
        let receipt = self
            .call(key, || self.services.payments.refund(request.clone()))
            .await?;
        Ok(DirectiveOutcome::RefundIssued {
            amount: receipt.amount,
            refund_ref: receipt.refund_ref,
            settled: receipt.settled,
        })
    }

    /// Ask the provider how much was captured when the webhook did not say.
    async fn captured_amount(&self, payment_ref: &str, key: &DirectiveKey) -> Result<Money, Failure> {
        match self
            .call(key, || self.services.payments.payment_status(payment_ref))
            .await?
        {
            PaymentStatus::Paid { amount: Some(amount) } => Ok(amount),
            PaymentStatus::Paid { amount: None } => Err(Failure::permanent(
                "provider reports the session paid without a captured amount",
            )),
            other => Err(Failure::permanent(format!(
                "booking is paid but the provider reports {other:?}"
            ))),
        }
    }

    /// Call a provider under the retry policy with a per-attempt timeout.
    async fn call<T, F, Fut>(&self, key: &DirectiveKey, operation: F) -> Result<T, Failure>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let timeout = self.policy.attempt_timeout;
        retry_with_predicate(
            &self.policy,
            || {
                let attempt = operation();
                async move {
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(timeout)),
                    }
                }
            },
            ProviderError::is_transient,
        )
        .await
        .map_err(|e| {
            tracing::warn!(directive_key = %key, attempts = e.attempts(), "Provider call failed");
            Failure::from(e)
        })
    }

    /// Write a successful outcome back, retrying on version conflicts.
    ///
    /// Returns `false` when another dispatcher recorded it first.
    async fn record_outcome(
        &self,
        booking_id: BookingId,
        record: &DirectiveRecord,
        outcome: DirectiveOutcome,
    ) -> Result<bool, CoordinatorError> {
        for attempt in 0..=self.max_conflict_retries {
            let mut booking = self.services.store.load(booking_id).await?;
            let now = self.services.clock.now();
            let expected = booking.version;

            match booking.record_outcome(&record.key, outcome.clone(), now) {
                Ok(false) => return Ok(false),
                Ok(true) => {},
                Err(BookingError::PaymentRefConflict { existing, proposed }) => {
                    let failure = Failure {
                        attempts: 1,
                        error: format!("payment session {proposed} would replace {existing}"),
                        kind: AnomalyKind::ProviderMismatch,
                    };
                    self.record_failure(booking_id, record, &failure).await?;
                    return Ok(false);
                },
                Err(BookingError::DirectiveNotFound(key)) => {
                    tracing::error!(%booking_id, directive_key = %key, "Ledger entry vanished");
                    return Ok(false);
                },
            }

            match self.services.store.save(&booking, expected).await {
                Ok(_) => {
                    metrics::counter!(
                        "booking_directives_total",
                        "directive" => record.directive.name(),
                        "outcome" => "executed"
                    )
                    .increment(1);
                    tracing::info!(
                        %booking_id,
                        directive = %record.directive,
                        directive_key = %record.key,
                        ?outcome,
                        "Directive executed"
                    );
                    return Ok(true);
                },
                Err(e) if e.is_conflict() => {
                    metrics::counter!("booking_version_conflicts_total").increment(1);
                    tracing::debug!(%booking_id, attempt, "Version conflict recording outcome");
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoordinatorError::ConflictRetriesExhausted {
            booking_id,
            attempts: self.max_conflict_retries + 1,
        })
    }

    /// Mark the entry failed, flag the booking and report the anomaly.
    async fn record_failure(
        &self,
        booking_id: BookingId,
        record: &DirectiveRecord,
        failure: &Failure,
    ) -> Result<(), CoordinatorError> {
        metrics::counter!(
            "booking_directives_total",
            "directive" => record.directive.name(),
            "outcome" => "failed"
        )
        .increment(1);
        tracing::error!(
            %booking_id,
            directive = %record.directive,
            directive_key = %record.key,
            attempts = failure.attempts,
            error = %failure.error,
            "Directive failed"
        );

        let mut saved = false;
        for _ in 0..=self.max_conflict_retries {
            let mut booking = self.services.store.load(booking_id).await?;
            let expected = booking.version;
            if booking
                .record_failure(&record.key, failure.attempts, &failure.error, self.services.clock.now())
                .is_err()
            {
                break;
            }
            match self.services.store.save(&booking, expected).await {
                Ok(_) => {
                    saved = true;
                    break;
                },
                Err(e) if e.is_conflict() => {
                    metrics::counter!("booking_version_conflicts_total").increment(1);
                },
                Err(e) => return Err(e.into()),
            }
        }

        let anomaly = Anomaly::new(
            failure.kind,
            format!(
                "{} ({}) failed after {} attempts: {}",
                record.directive, record.key, failure.attempts, failure.error
            ),
            self.services.clock.now(),
        )
        .with_booking(booking_id);
        report_anomaly(&self.services, anomaly).await;

        if saved {
            Ok(())
        } else {
            Err(CoordinatorError::ConflictRetriesExhausted {
                booking_id,
                attempts: self.max_conflict_retries + 1,
            })
        }
    }
}

/// Why a directive could not be executed.
#[derive(Debug)]
struct Failure {
    attempts: u32,
    error: String,
    kind: AnomalyKind,
}

impl Failure {
    fn permanent(error: impl Into<String>) -> Self {
        Self {
            attempts: 1,
            error: error.into(),
            kind: AnomalyKind::DirectiveFailed,
        }
    }
}

impl From<RetryError<ProviderError>> for Failure {
    fn from(err: RetryError<ProviderError>) -> Self {
        Self {
            attempts: err.attempts(),
            error: err.into_inner().to_string(),
            kind: AnomalyKind::DirectiveFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use booking_core::directive::DirectiveStatus;
    use booking_core::environment::UuidGenerator;
    use booking_core::event::{BookingEvent, EventEnvelope};
    use booking_core::machine::transition;
    use booking_core::refund::FullRefund;
    use booking_testing::fixtures::{self, envelope};
    use booking_testing::{
        InMemoryBookingStore, InMemoryPendingQueue, MockPaymentProvider, MockSchedulingProvider,
        RecordingAnomalyReporter, RecordingNotifier, SentNotification, test_clock,
    };
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        store: InMemoryBookingStore,
        payments: MockPaymentProvider,
        notifier: RecordingNotifier,
        anomalies: RecordingAnomalyReporter,
        dispatcher: Dispatcher,
    }

    fn harness(payments: MockPaymentProvider) -> Harness {
        let store = InMemoryBookingStore::new();
        let notifier = RecordingNotifier::new();
        let anomalies = RecordingAnomalyReporter::new();
        let services = Services {
            store: Arc::new(store.clone()),
            pending: Arc::new(InMemoryPendingQueue::new()),
            anomalies: Arc::new(anomalies.clone()),
            payments: Arc::new(payments.clone()),
            scheduling: Arc::new(MockSchedulingProvider::new()),
            notifier: Arc::new(notifier.clone()),
            refund_policy: Arc::new(FullRefund),
            clock: Arc::new(test_clock()),
            ids: Arc::new(UuidGenerator),
        };
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .jitter(0.0)
            .attempt_timeout(Duration::from_secs(1))
            .build();
        Harness {
            store,
            payments,
            notifier,
            anomalies,
            dispatcher: Dispatcher::new(services, policy, 3),
        }
    }

    fn step(booking: &mut Booking, key: &str, event: BookingEvent) {
        let env: EventEnvelope = envelope(booking.id, key, event);
        let t = transition(booking, &env.event).unwrap();
        let at = booking.last_transition_at;
        booking.apply(&env, &t, at);
    }

    fn awaiting_payment(h: &Harness) -> Booking {
        let mut booking = fixtures::pending_booking();
        step(&mut booking, "evt-1", fixtures::scheduling_confirmed("sched-1"));
        h.store.put(booking.clone());
        booking
    }

    #[tokio::test]
    async fn creates_payment_session_once() {
        let h = harness(MockPaymentProvider::new());
        let booking = awaiting_payment(&h);

        let first = h.dispatcher.dispatch(booking.id).await.unwrap();
        let second = h.dispatcher.dispatch(booking.id).await.unwrap();

        assert_eq!(first.executed, 1);
        assert_eq!(second, DispatchReport::default());
        assert_eq!(h.payments.session_calls(), 1);

        let stored = h.store.get(booking.id).unwrap();
        assert_eq!(stored.external_payment_ref.as_deref(), Some("cs_test_1"));
        assert_eq!(stored.payment_state, PaymentState::Pending);
        assert!(stored.checkout_url.is_some());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let payments = MockPaymentProvider::new();
        payments.fail_next(2, ProviderError::Unavailable("503".to_string()));
        let h = harness(payments);
        let booking = awaiting_payment(&h);

        let report = h.dispatcher.dispatch(booking.id).await.unwrap();

        assert_eq!(report.executed, 1);
        assert_eq!(h.payments.session_calls(), 3);
    }

    #[tokio::test]
    async fn exhaustion_flags_booking_without_changing_state() {
        let payments = MockPaymentProvider::new();
        payments.fail_next(3, ProviderError::Unavailable("503".to_string()));
        let h = harness(payments);
        let booking = awaiting_payment(&h);

        let report = h.dispatcher.dispatch(booking.id).await.unwrap();

        assert_eq!(report.failed, 1);
        let stored = h.store.get(booking.id).unwrap();
        assert_eq!(stored.state, BookingState::AwaitingPayment);
        assert!(stored.anomaly.is_some());
        assert!(matches!(
            stored.directives[0].status,
            DirectiveStatus::Failed { attempts: 3, .. }
        ));
        assert_eq!(h.anomalies.count(AnomalyKind::DirectiveFailed), 1);
        assert!(stored.view().processing);
    }

    #[tokio::test]
    async fn rejected_call_is_not_retried() {
        let payments = MockPaymentProvider::new();
        payments.fail_next(1, ProviderError::Rejected("invalid price".to_string()));
        let h = harness(payments);
        let booking = awaiting_payment(&h);

        let report = h.dispatcher.dispatch(booking.id).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(h.payments.session_calls(), 1);
    }

    #[tokio::test]
    async fn refunds_paid_cancellation_once() {
        let h = harness(MockPaymentProvider::settling_refunds());
        let mut booking = fixtures::pending_booking();
        step(&mut booking, "evt-1", fixtures::scheduling_confirmed("sched-1"));
        step(&mut booking, "pay-1", fixtures::payment_succeeded("cs_1"));
        step(&mut booking, "cancel", fixtures::cancellation("sick"));
        h.store.put(booking.clone());

        h.dispatcher.dispatch(booking.id).await.unwrap();
        h.dispatcher.dispatch(booking.id).await.unwrap();

        let refunds = h.payments.refunds();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, Money::new(15_000, "usd"));
        let stored = h.store.get(booking.id).unwrap();
        assert_eq!(stored.payment_state, PaymentState::Refunded);
        assert_eq!(
            stored.cancellation_status(),
            Some(booking_core::booking::CancellationStatus::Cancelled)
        );
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn unpaid_cancellation_needs_no_refund() {
        let h = harness(MockPaymentProvider::new());
        let mut booking = fixtures::pending_booking();
        step(&mut booking, "cancel", fixtures::cancellation("sick"));
        h.store.put(booking.clone());

        let report = h.dispatcher.dispatch(booking.id).await.unwrap();

        assert_eq!(report.executed, 1);
        assert_eq!(h.payments.refund_calls(), 0);
        let stored = h.store.get(booking.id).unwrap();
        assert!(matches!(
            &stored.directives[0].status,
            DirectiveStatus::Executed {
                outcome: DirectiveOutcome::RefundNotRequired,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stale_payment_session_directive_is_superseded() {
        let h = harness(MockPaymentProvider::new());
        let mut booking = fixtures::pending_booking();
        step(&mut booking, "evt-1", fixtures::scheduling_confirmed("sched-1"));
        step(&mut booking, "pay-1", fixtures::payment_succeeded("cs_1"));
        h.store.put(booking.clone());

        let report = h.dispatcher.dispatch(booking.id).await.unwrap();

        assert_eq!(report.executed, 2);
        assert_eq!(h.payments.session_calls(), 0);
        assert_eq!(h.notifier.sent(), vec![SentNotification::Confirmation(booking.id)]);
    }

    fn paid_without_recorded_amount(h: &Harness) -> Booking {
        let mut booking = fixtures::pending_booking();
        step(&mut booking, "evt-1", fixtures::scheduling_confirmed("sched-1"));
        step(
            &mut booking,
            "pay-1",
            BookingEvent::PaymentSucceeded {
                payment_ref: Some("cs_1".to_string()),
                amount: None,
            },
        );
        step(&mut booking, "cancel", fixtures::cancellation("sick"));
        h.store.put(booking.clone());
        booking
    }

    #[tokio::test]
    async fn refund_uses_captured_amount_from_provider() {
        let h = harness(MockPaymentProvider::settling_refunds());
        h.payments.set_status(
            "cs_1",
            PaymentStatus::Paid {
                amount: Some(Money::new(9_000, "usd")),
            },
        );
        let booking = paid_without_recorded_amount(&h);

        h.dispatcher.dispatch(booking.id).await.unwrap();

        let refunds = h.payments.refunds();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, Money::new(9_000, "usd"));
    }

    #[tokio::test]
    async fn paid_status_without_amount_fails_the_refund() {
        let h = harness(MockPaymentProvider::settling_refunds());
        h.payments.set_status("cs_1", PaymentStatus::Paid { amount: None });
        let booking = paid_without_recorded_amount(&h);

        let report = h.dispatcher.dispatch(booking.id).await.unwrap();

        assert_eq!(h.payments.refund_calls(), 0);
        assert!(report.failed >= 1);
        let stored = h.store.get(booking.id).unwrap();
        assert_eq!(stored.state, BookingState::Cancelled);
        assert!(stored.anomaly.is_some());
    }
}
