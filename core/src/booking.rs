//! The booking aggregate.
//!
//! A [`Booking`] is the single record reconciling what the scheduling
//! provider, the payment provider and the marketplace each believe about a
//! session. Its `state` only changes through [`Booking::apply`], which takes
//! a [`Transition`] computed by the pure engine in [`crate::machine`].

use crate::directive::{Directive, DirectiveOutcome, DirectiveRecord, DirectiveStatus};
use crate::event::{BookingEvent, EventEnvelope, EventKind, EventOrigin};
use crate::ids::{
    BookingId, BuilderId, ClientId, CorrelationKey, DirectiveKey, IdempotencyKey, SessionTypeId,
    Version,
};
use crate::machine::Transition;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a booking.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    /// Created, waiting for the scheduling provider.
    Pending,
    /// Slot confirmed, waiting for payment.
    AwaitingPayment,
    /// Last payment attempt failed; the client may retry.
    PaymentFailed,
    /// Scheduled and paid.
    Confirmed,
    /// The session took place.
    Completed,
    /// Cancelled by a participant, a provider or the recovery job.
    Cancelled,
}

impl BookingState {
    /// Whether no further state change is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Persisted name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::PaymentFailed => "PAYMENT_FAILED",
            Self::Confirmed => "CONFIRMED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse a persisted name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => Self::Pending,
            "AWAITING_PAYMENT" => Self::AwaitingPayment,
            "PAYMENT_FAILED" => Self::PaymentFailed,
            "CONFIRMED" => Self::Confirmed,
            "COMPLETED" => Self::Completed,
            "CANCELLED" => Self::Cancelled,
            _ => return None,
        })
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment sub-state, tracked separately because payment and scheduling can
/// each succeed or fail before the booking converges.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    /// No checkout session yet.
    Unpaid,
    /// A checkout session is open.
    Pending,
    /// Payment captured.
    Paid,
    /// Last attempt failed.
    Failed,
    /// Fully refunded.
    Refunded,
    /// Refunded in part.
    PartiallyRefunded,
}

impl PaymentState {
    /// Whether money was captured at some point.
    #[must_use]
    pub const fn was_captured(self) -> bool {
        matches!(self, Self::Paid | Self::Refunded | Self::PartiallyRefunded)
    }

    /// Persisted name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "UNPAID",
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
            Self::PartiallyRefunded => "PARTIALLY_REFUNDED",
        }
    }

    /// Parse a persisted name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "UNPAID" => Self::Unpaid,
            "PENDING" => Self::Pending,
            "PAID" => Self::Paid,
            "FAILED" => Self::Failed,
            "REFUNDED" => Self::Refunded,
            "PARTIALLY_REFUNDED" => Self::PartiallyRefunded,
            _ => return None,
        })
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only state history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// State entered (may equal the previous state for in-place transitions).
    pub state: BookingState,
    /// When the transition was applied.
    pub entered_at: DateTime<Utc>,
    /// Event that triggered it.
    pub event: EventKind,
    /// Idempotency key of that event.
    pub source_id: IdempotencyKey,
    /// Where the event came from.
    pub origin: EventOrigin,
}

/// Marks a booking as needing operator attention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    /// What went wrong.
    pub reason: String,
    /// When it was flagged.
    pub flagged_at: DateTime<Utc>,
}

/// Input of the "initiate booking" entrypoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    /// Client requesting the session.
    pub client_id: ClientId,
    /// Builder delivering the session.
    pub builder_id: BuilderId,
    /// Session type from the catalog.
    pub session_type_id: SessionTypeId,
    /// Requested start (UTC).
    pub requested_start: DateTime<Utc>,
    /// Requested end (UTC).
    pub requested_end: DateTime<Utc>,
    /// Client's IANA timezone, for display.
    pub client_timezone: String,
    /// Builder's IANA timezone, for display.
    pub builder_timezone: Option<String>,
}

/// Rejected "initiate booking" input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// End is not after start.
    #[error("requested end must be after requested start")]
    EmptyInterval,
    /// Timezone missing.
    #[error("client timezone is required")]
    MissingTimezone,
}

impl NewBooking {
    /// Check the request before a booking is created.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.requested_end <= self.requested_start {
            return Err(ValidationError::EmptyInterval);
        }
        if self.client_timezone.trim().is_empty() {
            return Err(ValidationError::MissingTimezone);
        }
        Ok(())
    }
}

/// Errors recording a directive outcome on the aggregate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// No ledger entry with this key.
    #[error("directive {0} is not in the ledger")]
    DirectiveNotFound(DirectiveKey),
    /// A second payment session would silently overwrite the first.
    #[error("payment reference already set to {existing}, refusing {proposed}")]
    PaymentRefConflict {
        /// Current reference.
        existing: String,
        /// Rejected reference.
        proposed: String,
    },
}

/// How the cancellation entrypoint reports a cancelled booking.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationStatus {
    /// Cancelled and nothing is owed.
    Cancelled,
    /// Cancelled, refund waiting on the payment provider.
    CancellationPending,
}

/// The booking aggregate root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Immutable identifier.
    pub id: BookingId,
    /// Client reference.
    pub client_id: ClientId,
    /// Builder reference.
    pub builder_id: BuilderId,
    /// Session type reference.
    pub session_type_id: SessionTypeId,
    /// Lifecycle state.
    pub state: BookingState,
    /// Payment sub-state.
    pub payment_state: PaymentState,
    /// Start time (UTC).
    pub scheduled_start: DateTime<Utc>,
    /// End time (UTC).
    pub scheduled_end: DateTime<Utc>,
    /// Client timezone, display only.
    pub client_timezone: String,
    /// Builder timezone, display only.
    pub builder_timezone: Option<String>,
    /// Scheduling provider event reference.
    pub external_scheduling_ref: Option<String>,
    /// Payment provider session reference.
    pub external_payment_ref: Option<String>,
    /// Set by an applied `PaymentSessionExpired`; allows one replacement.
    pub payment_ref_replaceable: bool,
    /// Whether the single allowed replacement happened.
    pub payment_ref_replaced: bool,
    /// Where the client pays.
    pub checkout_url: Option<String>,
    /// Captured amount.
    pub amount_paid: Option<Money>,
    /// Why the booking was cancelled.
    pub cancel_reason: Option<String>,
    /// Refunded (or being refunded) amount.
    pub refund_amount: Option<Money>,
    /// A refund was issued and the provider has not settled it yet.
    pub refund_pending: bool,
    /// Append-only transition log.
    pub state_history: Vec<HistoryEntry>,
    /// Keys of applied events.
    pub idempotency_keys: BTreeSet<IdempotencyKey>,
    /// Executed-directives ledger.
    pub directives: Vec<DirectiveRecord>,
    /// Outstanding operator flag.
    pub anomaly: Option<AnomalyFlag>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last applied transition.
    pub last_transition_at: DateTime<Utc>,
    /// Version the booking was loaded at.
    pub version: Version,
}

impl Booking {
    /// Idempotency key of the creation entry.
    #[must_use]
    pub fn creation_key(id: BookingId) -> IdempotencyKey {
        IdempotencyKey::new(format!("create:{id}"))
    }

    /// Create a new booking in `PENDING`.
    ///
    /// The creation itself is the first history entry so that every
    /// idempotency key maps to exactly one entry.
    #[must_use]
    pub fn create(id: BookingId, request: NewBooking, at: DateTime<Utc>) -> Self {
        let key = Self::creation_key(id);
        let mut idempotency_keys = BTreeSet::new();
        idempotency_keys.insert(key.clone());

        Self {
            id,
            client_id: request.client_id,
            builder_id: request.builder_id,
            session_type_id: request.session_type_id,
            state: BookingState::Pending,
            payment_state: PaymentState::Unpaid,
            scheduled_start: request.requested_start,
            scheduled_end: request.requested_end,
            client_timezone: request.client_timezone,
            builder_timezone: request.builder_timezone,
            external_scheduling_ref: None,
            external_payment_ref: None,
            payment_ref_replaceable: false,
            payment_ref_replaced: false,
            checkout_url: None,
            amount_paid: None,
            cancel_reason: None,
            refund_amount: None,
            refund_pending: false,
            state_history: vec![HistoryEntry {
                state: BookingState::Pending,
                entered_at: at,
                event: EventKind::BookingCreated,
                source_id: key,
                origin: EventOrigin::Command,
            }],
            idempotency_keys,
            directives: Vec::new(),
            anomaly: None,
            created_at: at,
            last_transition_at: at,
            version: Version::INITIAL,
        }
    }

    /// Whether the booking can no longer change state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether an event with this key was already applied.
    #[must_use]
    pub fn has_applied(&self, key: &IdempotencyKey) -> bool {
        self.idempotency_keys.contains(key)
    }

    /// Keys under which events for this booking may be parked.
    #[must_use]
    pub fn correlation_keys(&self) -> Vec<CorrelationKey> {
        let mut keys = vec![CorrelationKey::Booking(self.id)];
        if let Some(r) = &self.external_scheduling_ref {
            keys.push(CorrelationKey::SchedulingRef(r.clone()));
        }
        if let Some(r) = &self.external_payment_ref {
            keys.push(CorrelationKey::PaymentRef(r.clone()));
        }
        keys
    }

    /// Apply a transition computed by the engine for `envelope`.
    ///
    /// Appends a history entry, records the idempotency key, updates the
    /// fields the event carries and schedules the transition's directives in
    /// the ledger. Returns the keys of the newly scheduled directives.
    pub fn apply(
        &mut self,
        envelope: &EventEnvelope,
        transition: &Transition,
        at: DateTime<Utc>,
    ) -> Vec<DirectiveKey> {
        self.apply_payload(&envelope.event, transition);

        self.state = transition.to;
        self.state_history.push(HistoryEntry {
            state: transition.to,
            entered_at: at,
            event: envelope.kind(),
            source_id: envelope.idempotency_key.clone(),
            origin: envelope.origin,
        });
        self.idempotency_keys.insert(envelope.idempotency_key.clone());
        self.last_transition_at = at;

        let history_len = self.state_history.len();
        transition
            .directives
            .iter()
            .map(|directive| {
                let key = DirectiveKey::derive(self.id, directive.name(), history_len);
                self.directives.push(DirectiveRecord {
                    key: key.clone(),
                    directive: directive.clone(),
                    status: DirectiveStatus::Scheduled,
                    scheduled_at: at,
                });
                key
            })
            .collect()
    }

    fn apply_payload(&mut self, event: &BookingEvent, transition: &Transition) {
        match event {
            BookingEvent::SchedulingConfirmed {
                scheduling_ref,
                start,
                end,
            }
            | BookingEvent::RescheduleDetected {
                scheduling_ref,
                start,
                end,
            } => {
                self.external_scheduling_ref = Some(scheduling_ref.clone());
                self.scheduled_start = *start;
                self.scheduled_end = *end;
            },
            BookingEvent::SchedulingCancelled { reason } => {
                self.cancel_reason = Some(
                    reason
                        .clone()
                        .unwrap_or_else(|| "cancelled via scheduling provider".to_string()),
                );
            },
            BookingEvent::PaymentSucceeded {
                payment_ref,
                amount,
            } => {
                self.payment_state = PaymentState::Paid;
                if amount.is_some() {
                    self.amount_paid.clone_from(amount);
                }
                if self.external_payment_ref.is_none() {
                    self.external_payment_ref.clone_from(payment_ref);
                }
            },
            BookingEvent::PaymentFailed { .. } => {
                self.payment_state = PaymentState::Failed;
            },
            BookingEvent::CancellationRequested { reason, .. } => {
                self.cancel_reason = Some(reason.clone());
            },
            BookingEvent::PaymentSessionExpired { .. } => {
                if transition.to == BookingState::Cancelled {
                    self.cancel_reason = Some("payment session expired".to_string());
                } else {
                    self.payment_ref_replaceable = true;
                    self.checkout_url = None;
                    self.payment_state = PaymentState::Unpaid;
                }
            },
            BookingEvent::RefundSettled { amount } => {
                self.payment_state = match &self.amount_paid {
                    Some(paid) if amount.cents < paid.cents => PaymentState::PartiallyRefunded,
                    _ => PaymentState::Refunded,
                };
                self.refund_amount = Some(amount.clone());
                self.refund_pending = false;
            },
            BookingEvent::SessionCompleted => {},
        }
    }

    /// Ledger entries the dispatcher still has to run, in scheduling order.
    pub fn scheduled_directives(&self) -> impl Iterator<Item = &DirectiveRecord> {
        self.directives.iter().filter(|r| r.is_scheduled())
    }

    /// Ledger entry by key.
    #[must_use]
    pub fn directive(&self, key: &DirectiveKey) -> Option<&DirectiveRecord> {
        self.directives.iter().find(|r| &r.key == key)
    }

    /// Record a successful directive execution.
    ///
    /// Returns `Ok(false)` when the entry was already executed, which happens
    /// when two dispatchers race on the same booking.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError`] if the key is unknown or the outcome would
    /// overwrite a payment reference.
    pub fn record_outcome(
        &mut self,
        key: &DirectiveKey,
        outcome: DirectiveOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        let index = self
            .directives
            .iter()
            .position(|r| &r.key == key)
            .ok_or_else(|| BookingError::DirectiveNotFound(key.clone()))?;

        if self.directives[index].is_executed() {
            return Ok(false);
        }

        match &outcome {
            DirectiveOutcome::PaymentSessionCreated {
                payment_ref,
                checkout_url,
            } => {
                self.set_payment_ref(payment_ref)?;
                self.checkout_url.clone_from(checkout_url);
                if matches!(self.payment_state, PaymentState::Unpaid | PaymentState::Failed) {
                    self.payment_state = PaymentState::Pending;
                }
            },
            DirectiveOutcome::RefundIssued {
                amount, settled, ..
            } => {
                self.refund_amount = Some(amount.clone());
                if *settled {
                    self.payment_state = match &self.amount_paid {
                        Some(paid) if amount.cents < paid.cents => {
                            PaymentState::PartiallyRefunded
                        },
                        _ => PaymentState::Refunded,
                    };
                } else {
                    self.refund_pending = true;
                }
            },
            DirectiveOutcome::RefundNotRequired
            | DirectiveOutcome::Delivered
            | DirectiveOutcome::Superseded => {},
        }

        self.directives[index].status = DirectiveStatus::Executed { at, outcome };
        Ok(true)
    }

    /// Record a directive that could not be executed and flag the booking.
    ///
    /// `state` is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::DirectiveNotFound`] if the key is unknown.
    pub fn record_failure(
        &mut self,
        key: &DirectiveKey,
        attempts: u32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        let record = self
            .directives
            .iter_mut()
            .find(|r| &r.key == key)
            .ok_or_else(|| BookingError::DirectiveNotFound(key.clone()))?;

        if record.is_executed() {
            return Ok(());
        }

        record.status = DirectiveStatus::Failed {
            at,
            attempts,
            error: error.to_string(),
        };
        self.anomaly = Some(AnomalyFlag {
            reason: format!("{} failed after {attempts} attempts: {error}", record.directive),
            flagged_at: at,
        });
        Ok(())
    }

    fn set_payment_ref(&mut self, proposed: &str) -> Result<(), BookingError> {
        match self.external_payment_ref.as_deref() {
            None => {
                self.external_payment_ref = Some(proposed.to_string());
                Ok(())
            },
            Some(existing) if existing == proposed => Ok(()),
            Some(_) if self.payment_ref_replaceable => {
                self.external_payment_ref = Some(proposed.to_string());
                self.payment_ref_replaceable = false;
                self.payment_ref_replaced = true;
                Ok(())
            },
            Some(existing) => Err(BookingError::PaymentRefConflict {
                existing: existing.to_string(),
                proposed: proposed.to_string(),
            }),
        }
    }

    /// When the booking entered `CANCELLED`, if it did.
    #[must_use]
    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.state_history
            .iter()
            .find(|e| e.state == BookingState::Cancelled)
            .map(|e| e.entered_at)
    }

    /// Whether the payment was captured only after the booking was cancelled.
    ///
    /// Such captures are refunded in full regardless of the refund policy.
    #[must_use]
    pub fn captured_after_cancellation(&self) -> bool {
        let cancelled = self
            .state_history
            .iter()
            .position(|e| e.state == BookingState::Cancelled);
        let captured = self
            .state_history
            .iter()
            .position(|e| e.event == EventKind::PaymentSucceeded);
        matches!((cancelled, captured), (Some(c), Some(p)) if p > c)
    }

    /// How a cancelled booking should be reported to the caller.
    #[must_use]
    pub fn cancellation_status(&self) -> Option<CancellationStatus> {
        if self.state != BookingState::Cancelled {
            return None;
        }
        let refund_outstanding = self.directives.iter().any(|r| {
            r.directive == Directive::IssueRefundIfPaid && !r.is_executed()
        });
        if refund_outstanding || self.refund_pending {
            Some(CancellationStatus::CancellationPending)
        } else {
            Some(CancellationStatus::Cancelled)
        }
    }

    /// Whether work on this booking is still in flight or stuck.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.anomaly.is_some()
            || self.refund_pending
            || self.directives.iter().any(DirectiveRecord::is_scheduled)
    }

    /// Read-only projection served by the status query.
    #[must_use]
    pub fn view(&self) -> BookingView {
        BookingView {
            booking_id: self.id,
            state: self.state,
            payment_state: self.payment_state,
            scheduled_start: self.scheduled_start,
            scheduled_end: self.scheduled_end,
            client_timezone: self.client_timezone.clone(),
            builder_timezone: self.builder_timezone.clone(),
            checkout_url: self.checkout_url.clone(),
            cancel_reason: self.cancel_reason.clone(),
            refund_amount: self.refund_amount.clone(),
            created_at: self.created_at,
            last_transition_at: self.last_transition_at,
            processing: self.is_processing(),
        }
    }
}

/// Projection returned by the booking status query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingView {
    /// Booking identifier.
    pub booking_id: BookingId,
    /// Last successfully applied state.
    pub state: BookingState,
    /// Payment sub-state.
    pub payment_state: PaymentState,
    /// Start (UTC).
    pub scheduled_start: DateTime<Utc>,
    /// End (UTC).
    pub scheduled_end: DateTime<Utc>,
    /// Client timezone.
    pub client_timezone: String,
    /// Builder timezone.
    pub builder_timezone: Option<String>,
    /// Checkout URL while payment is open.
    pub checkout_url: Option<String>,
    /// Cancellation reason.
    pub cancel_reason: Option<String>,
    /// Refund amount.
    pub refund_amount: Option<Money>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub last_transition_at: DateTime<Utc>,
    /// Work is outstanding or an operator needs to look at the booking.
    pub processing: bool,
}
