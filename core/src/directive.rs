//! Side-effect descriptions emitted by the state machine.
//!
//! Directives are values, not execution. A transition returns them, the
//! booking records them in its ledger as [`DirectiveStatus::Scheduled`] in the
//! same write as the transition, and the dispatcher later executes each one
//! exactly once.

use crate::ids::DirectiveKey;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a client notification is about.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The last payment attempt failed and the client should retry.
    PaymentFailed,
}

/// A side effect requested by a transition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum Directive {
    /// Open a checkout session with the payment provider.
    CreatePaymentSession,
    /// Refund the client according to the refund policy, if anything was captured.
    IssueRefundIfPaid,
    /// Tell both parties the booking is confirmed.
    SendConfirmation,
    /// Tell the client something needs their attention.
    NotifyClient {
        /// What happened.
        reason: NotificationKind,
    },
    /// Propagate a rescheduled slot to both parties.
    UpdateScheduleRef,
}

impl Directive {
    /// Stable name, part of the directive key.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreatePaymentSession => "CreatePaymentSession",
            Self::IssueRefundIfPaid => "IssueRefundIfPaid",
            Self::SendConfirmation => "SendConfirmation",
            Self::NotifyClient { .. } => "NotifyClient",
            Self::UpdateScheduleRef => "UpdateScheduleRef",
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a successfully executed directive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DirectiveOutcome {
    /// A checkout session exists for the booking.
    PaymentSessionCreated {
        /// Provider session reference.
        payment_ref: String,
        /// URL the client pays at.
        checkout_url: Option<String>,
    },
    /// A refund was issued.
    RefundIssued {
        /// Refunded amount.
        amount: Money,
        /// Provider refund reference.
        refund_ref: String,
        /// Whether the provider already settled it; otherwise a
        /// `RefundSettled` webhook is expected.
        settled: bool,
    },
    /// Nothing was captured, or the policy refunds nothing.
    RefundNotRequired,
    /// A notification was handed to the notifier.
    Delivered,
    /// The booking moved on before the directive ran; nothing was done.
    Superseded,
}

/// Lifecycle of one ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DirectiveStatus {
    /// Recorded with its transition, not executed yet.
    Scheduled,
    /// Executed successfully; never executed again.
    Executed {
        /// Completion time.
        at: DateTime<Utc>,
        /// What the provider returned.
        outcome: DirectiveOutcome,
    },
    /// Retries exhausted or the provider rejected the call permanently.
    Failed {
        /// Time of the last attempt.
        at: DateTime<Utc>,
        /// Number of attempts made.
        attempts: u32,
        /// Last error message.
        error: String,
    },
}

/// One entry of the executed-directives ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveRecord {
    /// Deterministic key, also the provider idempotency key.
    pub key: DirectiveKey,
    /// What to do.
    pub directive: Directive,
    /// Where it stands.
    pub status: DirectiveStatus,
    /// When the transition scheduled it.
    pub scheduled_at: DateTime<Utc>,
}

impl DirectiveRecord {
    /// Whether the dispatcher still has to run this entry.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        matches!(self.status, DirectiveStatus::Scheduled)
    }

    /// Whether the entry ran successfully.
    #[must_use]
    pub const fn is_executed(&self) -> bool {
        matches!(self.status, DirectiveStatus::Executed { .. })
    }
}
