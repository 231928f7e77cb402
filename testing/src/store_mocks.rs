//! In-memory persistence for tests
//!
//! Provides fast, deterministic stand-ins for the PostgreSQL implementations:
//! - [`InMemoryBookingStore`]: version-checked booking storage with conflict injection
//! - [`InMemoryPendingQueue`]: parked-event queue
//! - [`RecordingAnomalyReporter`]: captures anomaly reports

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on lock poisoning

use booking_core::anomaly::{Anomaly, AnomalyKind, AnomalyReporter};
use booking_core::booking::Booking;
use booking_core::ids::{BookingId, CorrelationKey, Version};
use booking_core::pending::{ParkedEvent, PendingEventQueue};
use booking_core::store::{BookingFilter, BookingStore, BoxFuture, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// In-memory booking store.
///
/// Enforces the same version check as the PostgreSQL store and can inject
/// conflicts or outages so tests can exercise the reload-and-recompute loop
/// and the 503 path.
///
/// # Example
///
/// ```
/// use booking_testing::{InMemoryBookingStore, fixtures};
/// use booking_core::store::BookingStore;
/// use booking_core::ids::Version;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryBookingStore::new();
/// let booking = fixtures::pending_booking();
/// let version = store.save(&booking, Version::INITIAL).await?;
/// assert_eq!(version, Version::new(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBookingStore {
    bookings: Arc<RwLock<HashMap<BookingId, Booking>>>,
    injected_conflicts: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl InMemoryBookingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail with a version conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Simulate an outage: every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Snapshot of a stored booking.
    #[must_use]
    pub fn get(&self, id: BookingId) -> Option<Booking> {
        self.bookings.read().unwrap().get(&id).cloned()
    }

    /// Overwrite a stored booking without a version check (test setup only).
    pub fn put(&self, booking: Booking) {
        self.bookings.write().unwrap().insert(booking.id, booking);
    }

    /// Number of stored bookings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bookings.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bookings.read().unwrap().is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn find_ref(&self, pick: impl Fn(&Booking) -> Option<&String>, reference: &str) -> Option<BookingId> {
        self.bookings
            .read()
            .unwrap()
            .values()
            .find(|b| pick(b).is_some_and(|r| r == reference))
            .map(|b| b.id)
    }

    fn save_sync(&self, booking: &Booking, expected: Version) -> Result<Version, StoreError> {
        self.check_available()?;

        let mut bookings = self.bookings.write().unwrap();
        let actual = bookings.get(&booking.id).map_or(Version::INITIAL, |b| b.version);
        if actual != expected {
            return Err(StoreError::ConcurrencyConflict {
                booking_id: booking.id,
                expected,
                actual,
            });
        }
        if self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::ConcurrencyConflict {
                booking_id: booking.id,
                expected,
                actual: expected.next(),
            });
        }

        for other in bookings.values().filter(|b| b.id != booking.id) {
            let clash = [
                (&booking.external_scheduling_ref, &other.external_scheduling_ref),
                (&booking.external_payment_ref, &other.external_payment_ref),
            ]
            .into_iter()
            .find_map(|(ours, theirs)| ours.as_ref().filter(|r| theirs.as_ref() == Some(*r)));
            if let Some(reference) = clash {
                return Err(StoreError::DuplicateReference {
                    reference: reference.clone(),
                    owner: other.id,
                });
            }
        }

        let version = expected.next();
        let mut stored = booking.clone();
        stored.version = version;
        bookings.insert(booking.id, stored);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }
}

impl BookingStore for InMemoryBookingStore {
    fn load(&self, id: BookingId) -> BoxFuture<'_, Result<Booking, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            self.get(id).ok_or(StoreError::NotFound(id))
        })
    }

    fn save(&self, booking: &Booking, expected: Version) -> BoxFuture<'_, Result<Version, StoreError>> {
        let result = self.save_sync(booking, expected);
        Box::pin(async move { result })
    }

    fn find_by_scheduling_ref<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<BookingId>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.find_ref(|b| b.external_scheduling_ref.as_ref(), reference))
        })
    }

    fn find_by_payment_ref<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<BookingId>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.find_ref(|b| b.external_payment_ref.as_ref(), reference))
        })
    }

    fn find(&self, filter: BookingFilter, limit: usize) -> BoxFuture<'_, Result<Vec<Booking>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut found: Vec<Booking> = self
                .bookings
                .read()
                .unwrap()
                .values()
                .filter(|b| filter.matches(b))
                .cloned()
                .collect();
            found.sort_by_key(|b| b.last_transition_at);
            found.truncate(limit);
            Ok(found)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move { self.check_available() })
    }
}

/// In-memory parked-event queue.
///
/// Claims never lapse on their own; [`release_claims`](Self::release_claims)
/// stands in for an expired lease.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPendingQueue {
    slots: Arc<Mutex<Vec<Slot>>>,
    failing_parks: Arc<AtomicUsize>,
}

#[derive(Clone, Debug)]
struct Slot {
    event: ParkedEvent,
    claimed: bool,
}

impl InMemoryPendingQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry still in the queue, claimed or not.
    #[must_use]
    pub fn entries(&self) -> Vec<ParkedEvent> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .map(|slot| slot.event.clone())
            .collect()
    }

    /// Entries taken but neither acknowledged nor parked again.
    #[must_use]
    pub fn claimed(&self) -> usize {
        self.slots.lock().unwrap().iter().filter(|s| s.claimed).count()
    }

    /// Let every outstanding claim lapse.
    pub fn release_claims(&self) {
        for slot in self.slots.lock().unwrap().iter_mut() {
            slot.claimed = false;
        }
    }

    /// Fail the next `n` parks with [`StoreError::Unavailable`].
    pub fn fail_next_parks(&self, n: usize) {
        self.failing_parks.store(n, Ordering::SeqCst);
    }

    fn claim(&self, mut wanted: impl FnMut(&ParkedEvent) -> bool) -> Vec<ParkedEvent> {
        let mut slots = self.slots.lock().unwrap();
        let mut taken = Vec::new();
        for slot in slots.iter_mut().filter(|s| !s.claimed) {
            if wanted(&slot.event) {
                slot.claimed = true;
                taken.push(slot.event.clone());
            }
        }
        taken.sort_by(ParkedEvent::drain_order);
        taken
    }
}

impl PendingEventQueue for InMemoryPendingQueue {
    fn park(&self, event: ParkedEvent) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let failing = self
                .failing_parks
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(StoreError::Unavailable("parked queue unavailable".to_string()));
            }
            let mut slots = self.slots.lock().unwrap();
            let key = &event.envelope.idempotency_key;
            if let Some(existing) = slots
                .iter_mut()
                .find(|s| &s.event.envelope.idempotency_key == key)
            {
                existing.event.attempts = existing.event.attempts.max(event.attempts);
                existing.claimed = false;
            } else {
                slots.push(Slot { event, claimed: false });
            }
            Ok(())
        })
    }

    fn take<'a>(&'a self, keys: &'a [CorrelationKey]) -> BoxFuture<'a, Result<Vec<ParkedEvent>, StoreError>> {
        Box::pin(async move { Ok(self.claim(|e| keys.contains(&e.envelope.target))) })
    }

    fn take_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ParkedEvent>, StoreError>> {
        Box::pin(async move {
            let mut stale: Vec<_> = {
                let slots = self.slots.lock().unwrap();
                slots
                    .iter()
                    .filter(|s| !s.claimed && s.event.parked_at < older_than)
                    .map(|s| (s.event.parked_at, s.event.id))
                    .collect()
            };
            stale.sort_unstable();
            stale.truncate(limit);
            let chosen: Vec<_> = stale.into_iter().map(|(_, id)| id).collect();
            Ok(self.claim(|e| chosen.contains(&e.id)))
        })
    }

    fn acknowledge(&self, id: Uuid) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.slots.lock().unwrap().retain(|s| s.event.id != id);
            Ok(())
        })
    }

    fn len(&self) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move { Ok(self.slots.lock().unwrap().iter().filter(|s| !s.claimed).count()) })
    }
}

/// Anomaly reporter that keeps every report in memory.
#[derive(Clone, Debug, Default)]
pub struct RecordingAnomalyReporter {
    reports: Arc<Mutex<Vec<Anomaly>>>,
}

impl RecordingAnomalyReporter {
    /// Create an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports so far.
    #[must_use]
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.reports.lock().unwrap().clone()
    }

    /// Reports of `kind`.
    #[must_use]
    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.kind == kind)
            .count()
    }
}

impl AnomalyReporter for RecordingAnomalyReporter {
    fn report(&self, anomaly: Anomaly) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.reports.lock().unwrap().push(anomaly);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = InMemoryBookingStore::new();
        let booking = fixtures::pending_booking();
        let v1 = store.save(&booking, Version::INITIAL).await.unwrap();

        let mut first = store.load(booking.id).await.unwrap();
        let second = first.clone();
        first.cancel_reason = Some("first".to_string());
        assert_eq!(store.save(&first, v1).await.unwrap(), Version::new(2));

        let conflict = store.save(&second, v1).await;
        assert!(matches!(
            conflict,
            Err(StoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(2)
        ));
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = InMemoryBookingStore::new();
        let booking = fixtures::pending_booking();
        store.save(&booking, Version::INITIAL).await.unwrap();
        assert!(store.save(&booking, Version::INITIAL).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = InMemoryBookingStore::new();
        let booking = fixtures::pending_booking();
        store.inject_conflicts(1);
        assert!(store.save(&booking, Version::INITIAL).await.is_err());
        assert!(store.save(&booking, Version::INITIAL).await.is_ok());
    }

    #[tokio::test]
    async fn external_refs_are_unique() {
        let store = InMemoryBookingStore::new();
        let mut a = fixtures::pending_booking();
        let mut b = fixtures::pending_booking();
        a.external_payment_ref = Some("cs_1".to_string());
        b.external_payment_ref = Some("cs_1".to_string());
        store.save(&a, Version::INITIAL).await.unwrap();
        assert!(matches!(
            store.save(&b, Version::INITIAL).await,
            Err(StoreError::DuplicateReference { .. })
        ));
        assert_eq!(store.find_by_payment_ref("cs_1").await.unwrap(), Some(a.id));
    }

    #[tokio::test]
    async fn take_only_returns_matching_keys() {
        let queue = InMemoryPendingQueue::new();
        let booking = fixtures::pending_booking();
        let other = fixtures::pending_booking();
        let at = crate::test_time();
        queue
            .park(ParkedEvent::new(
                fixtures::envelope(booking.id, "a", fixtures::payment_succeeded("cs")),
                at,
            ))
            .await
            .unwrap();
        queue
            .park(ParkedEvent::new(
                fixtures::envelope(other.id, "b", fixtures::payment_succeeded("cs2")),
                at,
            ))
            .await
            .unwrap();

        let taken = queue.take(&booking.correlation_keys()).await.unwrap();
        assert_eq!(taken.len(), 1);
        assert_eq!(queue.len().await.unwrap(), 1);
    }
}
