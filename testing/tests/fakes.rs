//! The in-memory fakes behave like the durable stores they stand in for.

#![allow(clippy::unwrap_used)]

use booking_core::booking::BookingState;
use booking_core::ids::{CorrelationKey, Version};
use booking_core::pending::{ParkedEvent, PendingEventQueue};
use booking_core::store::{BookingFilter, BookingStore, StoreError};
use booking_testing::{InMemoryBookingStore, InMemoryPendingQueue, fixtures, test_time};
use chrono::Duration;

#[tokio::test]
async fn parking_the_same_delivery_twice_keeps_one_entry() {
    let queue = InMemoryPendingQueue::new();
    let booking = fixtures::pending_booking();
    let envelope = fixtures::envelope(booking.id, "stripe:evt_1", fixtures::payment_succeeded("cs_1"));

    let mut first = ParkedEvent::new(envelope.clone(), test_time());
    first.attempts = 2;
    queue.park(first).await.unwrap();
    queue.park(ParkedEvent::new(envelope, test_time())).await.unwrap();

    let entries = queue.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 2);
}

#[tokio::test]
async fn stale_take_respects_age_and_limit() {
    let queue = InMemoryPendingQueue::new();
    let booking = fixtures::pending_booking();
    for (minute, key) in [(0, "a"), (1, "b"), (30, "c")] {
        let envelope = fixtures::envelope(booking.id, key, fixtures::payment_succeeded("cs_1"));
        queue
            .park(ParkedEvent::new(envelope, test_time() + Duration::minutes(minute)))
            .await
            .unwrap();
    }

    let taken = queue
        .take_stale(test_time() + Duration::minutes(10), 1)
        .await
        .unwrap();

    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].envelope.idempotency_key.as_str(), "a");
    assert_eq!(queue.len().await.unwrap(), 2);
}

#[tokio::test]
async fn cancellation_drains_before_payment_for_the_same_booking() {
    let queue = InMemoryPendingQueue::new();
    let booking = fixtures::pending_booking();
    let payment = fixtures::envelope(booking.id, "pay", fixtures::payment_succeeded("cs_1"));
    let mut cancel = fixtures::envelope(booking.id, "cancel", fixtures::cancellation("changed plans"));
    cancel.received_at = payment.received_at + Duration::minutes(5);
    queue.park(ParkedEvent::new(payment, test_time())).await.unwrap();
    queue.park(ParkedEvent::new(cancel, test_time())).await.unwrap();

    let taken = queue.take(&[CorrelationKey::Booking(booking.id)]).await.unwrap();

    let keys: Vec<_> = taken.iter().map(|p| p.envelope.idempotency_key.as_str()).collect();
    assert_eq!(keys, ["cancel", "pay"]);
}

#[tokio::test]
async fn taken_entries_stay_claimed_until_settled() {
    let queue = InMemoryPendingQueue::new();
    let booking = fixtures::pending_booking();
    let keys = [CorrelationKey::Booking(booking.id)];
    for key in ["pay", "done"] {
        let envelope = fixtures::envelope(booking.id, key, fixtures::payment_succeeded("cs_1"));
        queue.park(ParkedEvent::new(envelope, test_time())).await.unwrap();
    }

    let taken = queue.take(&keys).await.unwrap();
    assert_eq!(taken.len(), 2);
    assert!(queue.take(&keys).await.unwrap().is_empty());
    assert_eq!((queue.len().await.unwrap(), queue.claimed()), (0, 2));

    queue.acknowledge(taken[0].id).await.unwrap();
    queue.park(taken[1].clone()).await.unwrap();
    assert_eq!(queue.entries().len(), 1);
    assert_eq!(queue.claimed(), 0);

    // An unsettled claim comes back once it lapses.
    let again = queue.take(&keys).await.unwrap();
    assert_eq!(again.len(), 1);
    queue.release_claims();
    assert_eq!(queue.take_stale(test_time() + Duration::minutes(1), 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sweep_filter_returns_idle_bookings_oldest_first() {
    let store = InMemoryBookingStore::new();
    let mut older = fixtures::pending_booking();
    older.last_transition_at = test_time() - Duration::hours(3);
    let mut newer = fixtures::pending_booking();
    newer.last_transition_at = test_time() - Duration::hours(2);
    let fresh = fixtures::pending_booking();
    for booking in [&newer, &fresh, &older] {
        store.save(booking, Version::INITIAL).await.unwrap();
    }

    let found = store
        .find(
            BookingFilter::new()
                .with_states([BookingState::Pending])
                .idle_since(test_time() - Duration::hours(1)),
            10,
        )
        .await
        .unwrap();

    let ids: Vec<_> = found.iter().map(|b| b.id).collect();
    assert_eq!(ids, [older.id, newer.id]);
}

#[tokio::test]
async fn outage_fails_every_call_until_cleared() {
    let store = InMemoryBookingStore::new();
    let booking = fixtures::pending_booking();
    store.set_unavailable(true);

    assert!(matches!(
        store.save(&booking, Version::INITIAL).await,
        Err(StoreError::Unavailable(_))
    ));
    assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));

    store.set_unavailable(false);
    store.save(&booking, Version::INITIAL).await.unwrap();
    assert_eq!(store.load(booking.id).await.unwrap().version, Version::INITIAL.next());
}
