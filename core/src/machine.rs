//! The transition engine.
//!
//! [`transition`] is a pure function of `(booking, event)`: it performs no I/O
//! and reads no clock, so the reconciler can recompute it freely after an
//! optimistic concurrency conflict. It returns either the next state with the
//! directives to schedule, or an [`InvalidTransition`] classifying why the
//! event does not apply.
//!
//! | Event | From | To | Directives |
//! |---|---|---|---|
//! | `SchedulingConfirmed` | `PENDING` | `AWAITING_PAYMENT` | `CreatePaymentSession` |
//! | `PaymentSucceeded` | `AWAITING_PAYMENT`, `PAYMENT_FAILED` | `CONFIRMED` | `SendConfirmation` |
//! | `PaymentSucceeded` (late) | `CANCELLED` | `CANCELLED` | `IssueRefundIfPaid` |
//! | `PaymentFailed` | `AWAITING_PAYMENT` | `PAYMENT_FAILED` | `NotifyClient` |
//! | `SchedulingCancelled` | `PENDING`, `AWAITING_PAYMENT` | `CANCELLED` | |
//! | `CancellationRequested` | any non-terminal | `CANCELLED` | `IssueRefundIfPaid` |
//! | `SessionCompleted` | `CONFIRMED` | `COMPLETED` | |
//! | `RescheduleDetected` | `AWAITING_PAYMENT`, `CONFIRMED` | same | `UpdateScheduleRef` |
//! | `PaymentSessionExpired` (first) | `AWAITING_PAYMENT`, `PAYMENT_FAILED` | same | `CreatePaymentSession` |
//! | `PaymentSessionExpired` (replaced) | `AWAITING_PAYMENT`, `PAYMENT_FAILED` | `CANCELLED` | |
//! | `RefundSettled` | `CANCELLED` | `CANCELLED` | |

use crate::booking::{Booking, BookingState, PaymentState};
use crate::directive::{Directive, NotificationKind};
use crate::event::{BookingEvent, EventKind};
use smallvec::{SmallVec, smallvec};
use std::fmt;
use thiserror::Error;

/// Directives emitted by one transition. Never more than two in practice.
pub type Directives = SmallVec<[Directive; 2]>;

/// A valid transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// State before the event.
    pub from: BookingState,
    /// State after the event.
    pub to: BookingState,
    /// Event that drives it.
    pub event: EventKind,
    /// Side effects to schedule.
    pub directives: Directives,
}

/// Why an event does not apply to the booking as it stands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Another event must be applied first; the event should be parked.
    AwaitingPrerequisite,
    /// The event's effect is already reflected; safe to drop.
    AlreadySatisfied,
    /// The booking is `COMPLETED` or `CANCELLED`.
    Terminal,
    /// The event contradicts the booking's state.
    NotApplicable,
}

impl Rejection {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingPrerequisite => "awaiting_prerequisite",
            Self::AlreadySatisfied => "already_satisfied",
            Self::Terminal => "terminal",
            Self::NotApplicable => "not_applicable",
        }
    }

    /// Whether the rejection should be surfaced to operators.
    #[must_use]
    pub const fn is_anomalous(self) -> bool {
        matches!(self, Self::Terminal | Self::NotApplicable)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event that does not apply to the booking's current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{event} does not apply to a booking in {from} ({rejection})")]
pub struct InvalidTransition {
    /// Current state.
    pub from: BookingState,
    /// Rejected event.
    pub event: EventKind,
    /// Classification.
    pub rejection: Rejection,
}

/// Compute the transition `event` drives from `booking`'s current state.
///
/// # Errors
///
/// Returns [`InvalidTransition`] when the event does not apply; the
/// [`Rejection`] tells the caller whether to park, drop or flag it.
#[allow(clippy::too_many_lines)] // one arm per event keeps the table readable
pub fn transition(booking: &Booking, event: &BookingEvent) -> Result<Transition, InvalidTransition> {
    use BookingState::{AwaitingPayment, Cancelled, Completed, Confirmed, PaymentFailed, Pending};

    let from = booking.state;
    let kind = event.kind();
    let ok = |to: BookingState, directives: Directives| {
        Ok(Transition {
            from,
            to,
            event: kind,
            directives,
        })
    };
    let reject = |rejection: Rejection| {
        Err(InvalidTransition {
            from,
            event: kind,
            rejection,
        })
    };
    let captured = booking.payment_state.was_captured();

    match event {
        BookingEvent::SchedulingConfirmed { scheduling_ref, .. } => {
            if booking.external_scheduling_ref.as_deref() == Some(scheduling_ref.as_str()) {
                return reject(Rejection::AlreadySatisfied);
            }
            match from {
                Pending => ok(AwaitingPayment, smallvec![Directive::CreatePaymentSession]),
                Cancelled | Completed => reject(Rejection::Terminal),
                _ => reject(Rejection::NotApplicable),
            }
        },

        BookingEvent::SchedulingCancelled { .. } => match from {
            Pending | AwaitingPayment => ok(Cancelled, SmallVec::new()),
            Cancelled => reject(Rejection::AlreadySatisfied),
            Completed => reject(Rejection::Terminal),
            PaymentFailed | Confirmed => reject(Rejection::NotApplicable),
        },

        BookingEvent::PaymentSucceeded { .. } => {
            if captured {
                return reject(Rejection::AlreadySatisfied);
            }
            match from {
                AwaitingPayment | PaymentFailed => {
                    ok(Confirmed, smallvec![Directive::SendConfirmation])
                },
                Pending => reject(Rejection::AwaitingPrerequisite),
                Cancelled => ok(Cancelled, smallvec![Directive::IssueRefundIfPaid]),
                Completed => reject(Rejection::Terminal),
                Confirmed => reject(Rejection::AlreadySatisfied),
            }
        },

        BookingEvent::PaymentFailed { .. } => match from {
            AwaitingPayment if !captured => ok(
                PaymentFailed,
                smallvec![Directive::NotifyClient {
                    reason: NotificationKind::PaymentFailed,
                }],
            ),
            AwaitingPayment | PaymentFailed | Confirmed => reject(Rejection::AlreadySatisfied),
            Pending => reject(Rejection::AwaitingPrerequisite),
            Cancelled | Completed => reject(Rejection::Terminal),
        },

        BookingEvent::CancellationRequested { .. } => match from {
            Cancelled => reject(Rejection::AlreadySatisfied),
            Completed => reject(Rejection::Terminal),
            Pending | AwaitingPayment | PaymentFailed | Confirmed => {
                ok(Cancelled, smallvec![Directive::IssueRefundIfPaid])
            },
        },

        BookingEvent::SessionCompleted => match from {
            Confirmed => ok(Completed, SmallVec::new()),
            Completed => reject(Rejection::AlreadySatisfied),
            Cancelled => reject(Rejection::Terminal),
            Pending | AwaitingPayment | PaymentFailed => reject(Rejection::AwaitingPrerequisite),
        },

        BookingEvent::RescheduleDetected { scheduling_ref, .. } => {
            if booking.external_scheduling_ref.as_deref() == Some(scheduling_ref.as_str()) {
                return reject(Rejection::AlreadySatisfied);
            }
            match from {
                AwaitingPayment | Confirmed => ok(from, smallvec![Directive::UpdateScheduleRef]),
                Pending | PaymentFailed => reject(Rejection::AwaitingPrerequisite),
                Cancelled | Completed => reject(Rejection::Terminal),
            }
        },

        BookingEvent::PaymentSessionExpired { payment_ref } => match from {
            Cancelled => reject(Rejection::AlreadySatisfied),
            Completed => reject(Rejection::Terminal),
            Pending => reject(Rejection::AwaitingPrerequisite),
            Confirmed => reject(Rejection::AlreadySatisfied),
            AwaitingPayment | PaymentFailed => {
                if captured
                    || booking.external_payment_ref.as_deref() != Some(payment_ref.as_str())
                    || booking.payment_ref_replaceable
                {
                    reject(Rejection::AlreadySatisfied)
                } else if booking.payment_ref_replaced {
                    ok(Cancelled, SmallVec::new())
                } else {
                    ok(from, smallvec![Directive::CreatePaymentSession])
                }
            },
        },

        BookingEvent::RefundSettled { amount } => match from {
            Cancelled => {
                let settled = matches!(
                    booking.payment_state,
                    PaymentState::Refunded | PaymentState::PartiallyRefunded
                );
                if settled && booking.refund_amount.as_ref() == Some(amount) {
                    reject(Rejection::AlreadySatisfied)
                } else {
                    ok(Cancelled, SmallVec::new())
                }
            },
            Completed => reject(Rejection::Terminal),
            Pending | AwaitingPayment | PaymentFailed | Confirmed => {
                reject(Rejection::NotApplicable)
            },
        },
    }
}
