//! The internal event vocabulary of the booking lifecycle.
//!
//! Provider-specific notifications (Calendly, Stripe) are normalized into
//! [`BookingEvent`]s by the ingestion layer; the recovery job and the
//! booking entrypoints produce the same events. The state machine only ever
//! sees this vocabulary, wrapped in an [`EventEnvelope`] carrying the
//! idempotency key and provenance.

use crate::ids::{CorrelationKey, IdempotencyKey};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized lifecycle event with its payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    /// The scheduling provider created the calendar event for this booking.
    SchedulingConfirmed {
        /// Provider reference (event URI).
        scheduling_ref: String,
        /// Confirmed start time.
        start: DateTime<Utc>,
        /// Confirmed end time.
        end: DateTime<Utc>,
    },
    /// The calendar event was cancelled on the provider side.
    SchedulingCancelled {
        /// Reason given by the invitee or host, if any.
        reason: Option<String>,
    },
    /// Payment for the booking was captured.
    PaymentSucceeded {
        /// Session the payment belongs to, when the provider reports it.
        payment_ref: Option<String>,
        /// Captured amount, when the provider reports it.
        amount: Option<Money>,
    },
    /// A payment attempt failed.
    PaymentFailed {
        /// Provider failure message.
        reason: Option<String>,
    },
    /// A participant or the system asked to cancel the booking.
    CancellationRequested {
        /// Human-readable reason.
        reason: String,
        /// Principal who asked, absent for system-initiated cancellations.
        requested_by: Option<String>,
    },
    /// The session took place.
    SessionCompleted,
    /// The calendar event moved to a new slot.
    RescheduleDetected {
        /// Reference of the replacement event.
        scheduling_ref: String,
        /// New start time.
        start: DateTime<Utc>,
        /// New end time.
        end: DateTime<Utc>,
    },
    /// The checkout session expired before the client paid.
    PaymentSessionExpired {
        /// Reference of the expired session.
        payment_ref: String,
    },
    /// The payment provider settled a refund.
    RefundSettled {
        /// Total amount refunded so far.
        amount: Money,
    },
}

impl BookingEvent {
    /// Fieldless discriminant, used in history entries, logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::SchedulingConfirmed { .. } => EventKind::SchedulingConfirmed,
            Self::SchedulingCancelled { .. } => EventKind::SchedulingCancelled,
            Self::PaymentSucceeded { .. } => EventKind::PaymentSucceeded,
            Self::PaymentFailed { .. } => EventKind::PaymentFailed,
            Self::CancellationRequested { .. } => EventKind::CancellationRequested,
            Self::SessionCompleted => EventKind::SessionCompleted,
            Self::RescheduleDetected { .. } => EventKind::RescheduleDetected,
            Self::PaymentSessionExpired { .. } => EventKind::PaymentSessionExpired,
            Self::RefundSettled { .. } => EventKind::RefundSettled,
        }
    }
}

/// Names of the events that can appear in a booking's history.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Entry written when the booking is created.
    BookingCreated,
    /// See [`BookingEvent::SchedulingConfirmed`].
    SchedulingConfirmed,
    /// See [`BookingEvent::SchedulingCancelled`].
    SchedulingCancelled,
    /// See [`BookingEvent::PaymentSucceeded`].
    PaymentSucceeded,
    /// See [`BookingEvent::PaymentFailed`].
    PaymentFailed,
    /// See [`BookingEvent::CancellationRequested`].
    CancellationRequested,
    /// See [`BookingEvent::SessionCompleted`].
    SessionCompleted,
    /// See [`BookingEvent::RescheduleDetected`].
    RescheduleDetected,
    /// See [`BookingEvent::PaymentSessionExpired`].
    PaymentSessionExpired,
    /// See [`BookingEvent::RefundSettled`].
    RefundSettled,
}

impl EventKind {
    /// Stable name used for persistence and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BookingCreated => "BookingCreated",
            Self::SchedulingConfirmed => "SchedulingConfirmed",
            Self::SchedulingCancelled => "SchedulingCancelled",
            Self::PaymentSucceeded => "PaymentSucceeded",
            Self::PaymentFailed => "PaymentFailed",
            Self::CancellationRequested => "CancellationRequested",
            Self::SessionCompleted => "SessionCompleted",
            Self::RescheduleDetected => "RescheduleDetected",
            Self::PaymentSessionExpired => "PaymentSessionExpired",
            Self::RefundSettled => "RefundSettled",
        }
    }

    /// Parse a persisted name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "BookingCreated" => Self::BookingCreated,
            "SchedulingConfirmed" => Self::SchedulingConfirmed,
            "SchedulingCancelled" => Self::SchedulingCancelled,
            "PaymentSucceeded" => Self::PaymentSucceeded,
            "PaymentFailed" => Self::PaymentFailed,
            "CancellationRequested" => Self::CancellationRequested,
            "SessionCompleted" => Self::SessionCompleted,
            "RescheduleDetected" => Self::RescheduleDetected,
            "PaymentSessionExpired" => Self::PaymentSessionExpired,
            "RefundSettled" => Self::RefundSettled,
            _ => return None,
        })
    }

    /// Ordering weight when draining parked events; higher drains first.
    ///
    /// Cancellation jumps the queue so its refund directive is computed
    /// against whatever payment state is current when it applies.
    #[must_use]
    pub const fn drain_priority(self) -> i16 {
        match self {
            Self::CancellationRequested => 100,
            Self::SchedulingConfirmed => 50,
            _ => 0,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External system that delivered a webhook.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Scheduling provider.
    Calendly,
    /// Payment provider.
    Stripe,
}

impl Provider {
    /// Lower-case provider name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calendly => "calendly",
            Self::Stripe => "stripe",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an event came from.
///
/// Synthetic events are kept distinct from delivered webhooks so that the
/// audit trail shows which transitions the recovery job manufactured.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", content = "provider", rename_all = "snake_case")]
pub enum EventOrigin {
    /// A booking entrypoint (create, cancel).
    Command,
    /// A verified webhook delivery.
    Webhook(Provider),
    /// Manufactured by the recovery job from a provider status query.
    Synthetic,
}

impl EventOrigin {
    /// Stable label for persistence and metrics.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::Command => "command".to_string(),
            Self::Webhook(provider) => format!("webhook:{provider}"),
            Self::Synthetic => "synthetic".to_string(),
        }
    }

    /// Parse a persisted label.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "command" => Some(Self::Command),
            "synthetic" => Some(Self::Synthetic),
            "webhook:calendly" => Some(Self::Webhook(Provider::Calendly)),
            "webhook:stripe" => Some(Self::Webhook(Provider::Stripe)),
            _ => None,
        }
    }
}

/// An event together with its identity and provenance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Deduplication token.
    pub idempotency_key: IdempotencyKey,
    /// How to find the booking.
    pub target: CorrelationKey,
    /// The normalized event.
    pub event: BookingEvent,
    /// Provenance.
    pub origin: EventOrigin,
    /// When the event was first received.
    pub received_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Build an envelope.
    #[must_use]
    pub const fn new(
        idempotency_key: IdempotencyKey,
        target: CorrelationKey,
        event: BookingEvent,
        origin: EventOrigin,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            idempotency_key,
            target,
            event,
            origin,
            received_at,
        }
    }

    /// Shorthand for `self.event.kind()`.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
