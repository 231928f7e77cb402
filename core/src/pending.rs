//! The parked-event queue.
//!
//! Events that arrive before their prerequisite (a payment webhook before the
//! scheduling confirmation, say) are parked under the [`CorrelationKey`] they
//! addressed. After any successful transition the reconciler claims the
//! entries parked under the booking's keys and re-evaluates them. The queue
//! must survive restarts, so production uses a database table.
//!
//! Taking an entry only claims it. The entry leaves the queue when it is
//! acknowledged, and parking it again releases the claim with its new
//! attempt count. A claim that is never settled (the process died mid-drain)
//! lapses, and the entry becomes takeable again.

use crate::event::EventEnvelope;
use crate::ids::CorrelationKey;
use crate::store::{BoxFuture, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A parked event with its bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkedEvent {
    /// Queue entry identifier.
    pub id: Uuid,
    /// The event as it was received.
    pub envelope: EventEnvelope,
    /// When it was first parked.
    pub parked_at: DateTime<Utc>,
    /// Times it was re-evaluated without applying.
    pub attempts: u32,
}

impl ParkedEvent {
    /// Park `envelope` now.
    #[must_use]
    pub fn new(envelope: EventEnvelope, parked_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            envelope,
            parked_at,
            attempts: 0,
        }
    }

    /// Drain order: priority of the event kind first, then arrival.
    #[must_use]
    pub fn drain_order(a: &Self, b: &Self) -> std::cmp::Ordering {
        b.envelope
            .kind()
            .drain_priority()
            .cmp(&a.envelope.kind().drain_priority())
            .then(a.envelope.received_at.cmp(&b.envelope.received_at))
            .then(a.parked_at.cmp(&b.parked_at))
    }
}

/// Durable queue of events waiting for a prerequisite.
pub trait PendingEventQueue: Send + Sync {
    /// Park an event. Parking the same idempotency key twice keeps one entry,
    /// with the higher attempt count, and releases any claim on it.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on I/O failure.
    fn park(&self, event: ParkedEvent) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Claim and return every unclaimed entry parked under one of `keys`, in
    /// drain order.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on I/O failure.
    fn take<'a>(&'a self, keys: &'a [CorrelationKey]) -> BoxFuture<'a, Result<Vec<ParkedEvent>, StoreError>>;

    /// Claim up to `limit` unclaimed entries parked before `older_than`,
    /// choosing the oldest, and return them in drain order.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on I/O failure.
    fn take_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ParkedEvent>, StoreError>>;

    /// Remove a claimed entry that no longer needs to wait.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on I/O failure. The entry stays claimed
    /// and returns once the claim lapses.
    fn acknowledge(&self, id: Uuid) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Number of entries waiting to be taken.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on I/O failure.
    fn len(&self) -> BoxFuture<'_, Result<usize, StoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BookingEvent, EventOrigin};
    use crate::ids::{BookingId, IdempotencyKey};
    use chrono::TimeZone;

    fn parked(event: BookingEvent, minute: u32) -> ParkedEvent {
        let at = Utc
            .with_ymd_and_hms(2025, 1, 1, 12, minute, 0)
            .single()
            .unwrap_or_default();
        ParkedEvent::new(
            EventEnvelope::new(
                IdempotencyKey::new(format!("k{minute}")),
                CorrelationKey::Booking(BookingId::new_v4()),
                event,
                EventOrigin::Command,
                at,
            ),
            at,
        )
    }

    #[test]
    fn cancellation_sorts_ahead_of_earlier_payment() {
        let payment = parked(
            BookingEvent::PaymentSucceeded {
                payment_ref: None,
                amount: None,
            },
            1,
        );
        let cancel = parked(
            BookingEvent::CancellationRequested {
                reason: "x".to_string(),
                requested_by: None,
            },
            5,
        );
        let mut queue = vec![payment.clone(), cancel.clone()];
        queue.sort_by(ParkedEvent::drain_order);
        assert_eq!(queue, vec![cancel, payment]);
    }

    #[test]
    fn same_priority_drains_in_arrival_order() {
        let late = parked(BookingEvent::SessionCompleted, 9);
        let early = parked(BookingEvent::SessionCompleted, 2);
        let mut queue = vec![late.clone(), early.clone()];
        queue.sort_by(ParkedEvent::drain_order);
        assert_eq!(queue, vec![early, late]);
    }
}
