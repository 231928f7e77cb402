//! Fake external providers
//!
//! The fakes behave like the real providers where it matters for
//! correctness: a repeated idempotency key returns the original result
//! instead of creating a second session or refund. Failures can be queued to
//! exercise retries and exhaustion.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on lock poisoning

use booking_core::booking::Booking;
use booking_core::directive::NotificationKind;
use booking_core::ids::{BookingId, DirectiveKey};
use booking_core::provider::{
    Notifier, PaymentProvider, PaymentSession, PaymentSessionRequest, PaymentStatus, ProviderError,
    RefundReceipt, RefundRequest, SchedulingProvider, SchedulingStatus,
};
use booking_core::store::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct PaymentLedger {
    sessions: HashMap<DirectiveKey, PaymentSession>,
    refunds: HashMap<DirectiveKey, (RefundRequest, RefundReceipt)>,
    statuses: HashMap<String, PaymentStatus>,
    failures: VecDeque<ProviderError>,
    next_id: usize,
}

/// Fake payment provider.
///
/// # Example
///
/// ```
/// use booking_testing::MockPaymentProvider;
/// use booking_core::provider::ProviderError;
///
/// let payments = MockPaymentProvider::new();
/// payments.fail_next(2, ProviderError::Unavailable("503".to_string()));
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockPaymentProvider {
    state: Arc<Mutex<PaymentLedger>>,
    session_calls: Arc<AtomicUsize>,
    refund_calls: Arc<AtomicUsize>,
    settle_refunds: bool,
}

impl MockPaymentProvider {
    /// Provider whose refunds settle asynchronously.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose refunds settle immediately.
    #[must_use]
    pub fn settling_refunds() -> Self {
        Self {
            settle_refunds: true,
            ..Self::default()
        }
    }

    /// Fail the next `n` calls with `error`.
    pub fn fail_next(&self, n: usize, error: ProviderError) {
        let mut state = self.state.lock().unwrap();
        state.failures.extend(std::iter::repeat_n(error, n));
    }

    /// Report `status` for `payment_ref`.
    pub fn set_status(&self, payment_ref: &str, status: PaymentStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(payment_ref.to_string(), status);
    }

    /// Distinct sessions created.
    #[must_use]
    pub fn sessions_created(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// `create_session` calls, including retries and deduplicated ones.
    #[must_use]
    pub fn session_calls(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }

    /// Distinct refunds issued.
    #[must_use]
    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.state
            .lock()
            .unwrap()
            .refunds
            .values()
            .map(|(request, _)| request.clone())
            .collect()
    }

    /// `refund` calls, including retries and deduplicated ones.
    #[must_use]
    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<ProviderError> {
        self.state.lock().unwrap().failures.pop_front()
    }
}

impl PaymentProvider for MockPaymentProvider {
    fn create_session(
        &self,
        request: PaymentSessionRequest,
    ) -> BoxFuture<'_, Result<PaymentSession, ProviderError>> {
        Box::pin(async move {
            self.session_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.next_failure() {
                return Err(error);
            }
            let mut state = self.state.lock().unwrap();
            if let Some(existing) = state.sessions.get(&request.idempotency_key) {
                return Ok(existing.clone());
            }
            state.next_id += 1;
            let payment_ref = format!("cs_test_{}", state.next_id);
            let session = PaymentSession {
                checkout_url: Some(format!("https://checkout.test/{payment_ref}")),
                payment_ref: payment_ref.clone(),
            };
            state.statuses.insert(payment_ref, PaymentStatus::Open);
            state.sessions.insert(request.idempotency_key, session.clone());
            Ok(session)
        })
    }

    fn refund(&self, request: RefundRequest) -> BoxFuture<'_, Result<RefundReceipt, ProviderError>> {
        Box::pin(async move {
            self.refund_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.next_failure() {
                return Err(error);
            }
            let mut state = self.state.lock().unwrap();
            if let Some((_, receipt)) = state.refunds.get(&request.idempotency_key) {
                return Ok(receipt.clone());
            }
            state.next_id += 1;
            let receipt = RefundReceipt {
                refund_ref: format!("re_test_{}", state.next_id),
                amount: request.amount.clone(),
                settled: self.settle_refunds,
            };
            state
                .refunds
                .insert(request.idempotency_key.clone(), (request, receipt.clone()));
            Ok(receipt)
        })
    }

    fn payment_status<'a>(
        &'a self,
        payment_ref: &'a str,
    ) -> BoxFuture<'a, Result<PaymentStatus, ProviderError>> {
        Box::pin(async move {
            if let Some(error) = self.next_failure() {
                return Err(error);
            }
            let state = self.state.lock().unwrap();
            state
                .statuses
                .get(payment_ref)
                .cloned()
                .ok_or_else(|| ProviderError::Rejected(format!("no such session: {payment_ref}")))
        })
    }
}

/// Fake scheduling provider answering from a per-booking table.
#[derive(Clone, Debug, Default)]
pub struct MockSchedulingProvider {
    statuses: Arc<Mutex<HashMap<BookingId, SchedulingStatus>>>,
    failing: Arc<Mutex<HashMap<BookingId, ProviderError>>>,
    lookups: Arc<AtomicUsize>,
}

impl MockSchedulingProvider {
    /// Every booking starts as [`SchedulingStatus::NotFound`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `status` for `booking_id`.
    pub fn set_status(&self, booking_id: BookingId, status: SchedulingStatus) {
        self.statuses.lock().unwrap().insert(booking_id, status);
    }

    /// Fail every lookup for `booking_id` with `error`.
    pub fn fail_for(&self, booking_id: BookingId, error: ProviderError) {
        self.failing.lock().unwrap().insert(booking_id, error);
    }

    /// Number of lookups performed.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl SchedulingProvider for MockSchedulingProvider {
    fn lookup<'a>(&'a self, booking: &'a Booking) -> BoxFuture<'a, Result<SchedulingStatus, ProviderError>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.failing.lock().unwrap().get(&booking.id) {
                return Err(error.clone());
            }
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .get(&booking.id)
                .cloned()
                .unwrap_or(SchedulingStatus::NotFound))
        })
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentNotification {
    /// Confirmation to both parties.
    Confirmation(BookingId),
    /// Client notice.
    Client(BookingId, NotificationKind),
    /// Schedule change.
    ScheduleUpdated(BookingId),
}

/// Notifier that records deliveries, deduplicated by directive key.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(DirectiveKey, SentNotification)>>>,
    failures: Arc<Mutex<VecDeque<ProviderError>>>,
}

impl RecordingNotifier {
    /// Create an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` deliveries with `error`.
    pub fn fail_next(&self, n: usize, error: ProviderError) {
        self.failures
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(error, n));
    }

    /// Delivered notifications in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().iter().map(|(_, n)| n.clone()).collect()
    }

    fn record(&self, key: &DirectiveKey, notification: SentNotification) -> Result<(), ProviderError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut sent = self.sent.lock().unwrap();
        if !sent.iter().any(|(k, _)| k == key) {
            sent.push((key.clone(), notification));
        }
        Ok(())
    }
}

impl Notifier for RecordingNotifier {
    fn send_confirmation<'a>(
        &'a self,
        booking: &'a Booking,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move { self.record(key, SentNotification::Confirmation(booking.id)) })
    }

    fn notify_client<'a>(
        &'a self,
        booking: &'a Booking,
        reason: NotificationKind,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move { self.record(key, SentNotification::Client(booking.id, reason)) })
    }

    fn schedule_updated<'a>(
        &'a self,
        booking: &'a Booking,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move { self.record(key, SentNotification::ScheduleUpdated(booking.id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::ids::{ClientId, SessionTypeId};

    #[tokio::test]
    async fn same_key_returns_same_session() {
        let payments = MockPaymentProvider::new();
        let id = BookingId::new_v4();
        let request = PaymentSessionRequest {
            booking_id: id,
            client_id: ClientId::new("c"),
            session_type_id: SessionTypeId::new("s"),
            idempotency_key: DirectiveKey::derive(id, "CreatePaymentSession", 2),
        };
        let first = payments.create_session(request.clone()).await.unwrap();
        let second = payments.create_session(request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(payments.sessions_created(), 1);
        assert_eq!(payments.session_calls(), 2);
    }

    #[tokio::test]
    async fn queued_failures_come_first() {
        let payments = MockPaymentProvider::new();
        payments.fail_next(1, ProviderError::Timeout(std::time::Duration::from_secs(1)));
        assert!(payments.payment_status("cs_x").await.is_err());
        payments.set_status("cs_x", PaymentStatus::Expired);
        assert_eq!(payments.payment_status("cs_x").await.unwrap(), PaymentStatus::Expired);
    }
}
