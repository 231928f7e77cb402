//! Operator-facing anomaly reports.
//!
//! Anomalies are conditions the coordinator cannot resolve on its own: an
//! event that contradicts a booking's state, a directive that kept failing,
//! or a webhook whose booking cannot be found. They are recorded, never
//! silently dropped, and never block processing of other bookings.

use crate::event::EventKind;
use crate::ids::{BookingId, CorrelationKey, IdempotencyKey};
use crate::store::{BoxFuture, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an anomaly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Event rejected as terminal or not applicable.
    InvalidTransition,
    /// A directive exhausted its retries or was rejected.
    DirectiveFailed,
    /// The addressed booking does not exist.
    UnknownBooking,
    /// A parked event never found its prerequisite.
    PrerequisiteTimeout,
    /// Provider reports disagree with the booking and cannot be reconciled.
    ProviderMismatch,
}

impl AnomalyKind {
    /// Persisted name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidTransition => "invalid_transition",
            Self::DirectiveFailed => "directive_failed",
            Self::UnknownBooking => "unknown_booking",
            Self::PrerequisiteTimeout => "prerequisite_timeout",
            Self::ProviderMismatch => "provider_mismatch",
        }
    }

    /// Parse a persisted name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "invalid_transition" => Self::InvalidTransition,
            "directive_failed" => Self::DirectiveFailed,
            "unknown_booking" => Self::UnknownBooking,
            "prerequisite_timeout" => Self::PrerequisiteTimeout,
            "provider_mismatch" => Self::ProviderMismatch,
            _ => return None,
        })
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One anomaly report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Category.
    pub kind: AnomalyKind,
    /// Booking, when known.
    pub booking_id: Option<BookingId>,
    /// Address the event used, when the booking is unknown.
    pub target: Option<CorrelationKey>,
    /// Event involved, if any.
    pub event: Option<EventKind>,
    /// Its idempotency key, if any.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Human-readable detail.
    pub detail: String,
    /// When it was observed.
    pub observed_at: DateTime<Utc>,
}

impl Anomaly {
    /// Start a report of `kind`.
    #[must_use]
    pub fn new(kind: AnomalyKind, detail: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            booking_id: None,
            target: None,
            event: None,
            idempotency_key: None,
            detail: detail.into(),
            observed_at,
        }
    }

    /// Attach the booking.
    #[must_use]
    pub const fn with_booking(mut self, id: BookingId) -> Self {
        self.booking_id = Some(id);
        self
    }

    /// Attach the correlation key the event addressed.
    #[must_use]
    pub fn with_target(mut self, target: CorrelationKey) -> Self {
        self.target = Some(target);
        self
    }

    /// Attach the event.
    #[must_use]
    pub fn with_event(mut self, kind: EventKind, key: IdempotencyKey) -> Self {
        self.event = Some(kind);
        self.idempotency_key = Some(key);
        self
    }
}

/// Sink for anomaly reports.
pub trait AnomalyReporter: Send + Sync {
    /// Record an anomaly.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the report could not be persisted.
    fn report(&self, anomaly: Anomaly) -> BoxFuture<'_, Result<(), StoreError>>;
}
