//! Booking persistence abstraction.
//!
//! The store holds the authoritative [`Booking`] record. Writes are
//! version-checked: [`BookingStore::save`] succeeds only if the stored version
//! still equals the version the caller loaded, so two concurrent writers can
//! never both apply a transition computed from the same snapshot.
//!
//! # Implementations
//!
//! - `PostgresBookingStore` (in `booking-postgres`): production storage
//! - `InMemoryBookingStore` (in `booking-testing`): deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` so the coordinator can hold an
//! `Arc<dyn BookingStore>`.

use crate::booking::{Booking, BookingState};
use crate::ids::{BookingId, Version};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by the persistence and provider traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The stored version differs from the expected one.
    #[error("Concurrency conflict on booking {booking_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Booking that was written concurrently.
        booking_id: BookingId,
        /// Version the caller loaded.
        expected: Version,
        /// Version currently stored.
        actual: Version,
    },

    /// No booking with this ID.
    #[error("Booking not found: {0}")]
    NotFound(BookingId),

    /// Another booking already claims this external reference.
    #[error("External reference {reference} already belongs to booking {owner}")]
    DuplicateReference {
        /// The contested reference.
        reference: String,
        /// Booking that owns it.
        owner: BookingId,
    },

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the caller should reload and recompute.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Criteria for the recovery sweep's candidate scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookingFilter {
    /// Only bookings in one of these states. Empty means any.
    pub states: Vec<BookingState>,
    /// Only bookings whose last transition is older than this.
    pub last_transition_before: Option<DateTime<Utc>>,
    /// Only bookings whose scheduled end is older than this.
    pub scheduled_end_before: Option<DateTime<Utc>>,
    /// Only bookings with at least one scheduled directive.
    pub with_scheduled_directives: bool,
}

impl BookingFilter {
    /// Match any booking.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given states.
    #[must_use]
    pub fn with_states(mut self, states: impl IntoIterator<Item = BookingState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    /// Restrict to bookings idle since before `at`.
    #[must_use]
    pub const fn idle_since(mut self, at: DateTime<Utc>) -> Self {
        self.last_transition_before = Some(at);
        self
    }

    /// Restrict to sessions that ended before `at`.
    #[must_use]
    pub const fn ended_before(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_end_before = Some(at);
        self
    }

    /// Restrict to bookings with undispatched directives.
    #[must_use]
    pub const fn with_scheduled_directives(mut self) -> Self {
        self.with_scheduled_directives = true;
        self
    }

    /// Whether `booking` satisfies every criterion.
    #[must_use]
    pub fn matches(&self, booking: &Booking) -> bool {
        (self.states.is_empty() || self.states.contains(&booking.state))
            && self
                .last_transition_before
                .is_none_or(|at| booking.last_transition_at < at)
            && self
                .scheduled_end_before
                .is_none_or(|at| booking.scheduled_end < at)
            && (!self.with_scheduled_directives || booking.scheduled_directives().next().is_some())
    }
}

/// Durable storage of booking aggregates.
pub trait BookingStore: Send + Sync {
    /// Load a booking. The returned value carries the stored version.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if absent, [`StoreError::Unavailable`] on I/O failure.
    fn load(&self, id: BookingId) -> BoxFuture<'_, Result<Booking, StoreError>>;

    /// Persist `booking` if the stored version still equals `expected`.
    ///
    /// `expected == Version::INITIAL` inserts a new booking. History,
    /// idempotency keys and the directive ledger are written atomically with
    /// the state. Returns the new version.
    ///
    /// # Errors
    ///
    /// [`StoreError::ConcurrencyConflict`] when the version moved, or
    /// [`StoreError::DuplicateReference`] when an external reference is
    /// already owned by another booking.
    fn save(&self, booking: &Booking, expected: Version) -> BoxFuture<'_, Result<Version, StoreError>>;

    /// Resolve a scheduling provider reference.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on I/O failure.
    fn find_by_scheduling_ref<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<BookingId>, StoreError>>;

    /// Resolve a payment provider reference.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on I/O failure.
    fn find_by_payment_ref<'a>(
        &'a self,
        reference: &'a str,
    ) -> BoxFuture<'a, Result<Option<BookingId>, StoreError>>;

    /// Bookings matching `filter`, oldest transition first, at most `limit`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on I/O failure.
    fn find(&self, filter: BookingFilter, limit: usize) -> BoxFuture<'_, Result<Vec<Booking>, StoreError>>;

    /// Liveness probe used by readiness checks.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the store cannot serve requests.
    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>>;
}
