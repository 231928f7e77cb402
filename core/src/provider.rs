//! External provider abstractions.
//!
//! The dispatcher executes directives through these traits and the recovery
//! job queries them for ground truth. Every call that mutates provider state
//! carries a [`DirectiveKey`] which implementations must forward as the
//! provider's idempotency key, so a retried or concurrently re-driven
//! directive produces at most one external effect.

use crate::booking::Booking;
use crate::ids::{BookingId, ClientId, DirectiveKey, SessionTypeId};
use crate::money::Money;
use crate::store::BoxFuture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by provider clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Network failure or 5xx; worth retrying.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within its deadline.
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider refused the request; retrying will not help.
    #[error("Provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Whether the call may succeed if retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Input of [`PaymentProvider::create_session`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentSessionRequest {
    /// Booking being paid for; echoed back by webhooks.
    pub booking_id: BookingId,
    /// Paying client.
    pub client_id: ClientId,
    /// Priced catalog entry.
    pub session_type_id: SessionTypeId,
    /// Provider idempotency key.
    pub idempotency_key: DirectiveKey,
}

/// A checkout session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentSession {
    /// Session reference.
    pub payment_ref: String,
    /// Hosted checkout URL.
    pub checkout_url: Option<String>,
}

/// Input of [`PaymentProvider::refund`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundRequest {
    /// Session whose payment is refunded.
    pub payment_ref: String,
    /// Amount to refund.
    pub amount: Money,
    /// Provider idempotency key.
    pub idempotency_key: DirectiveKey,
}

/// A refund accepted by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundReceipt {
    /// Refund reference.
    pub refund_ref: String,
    /// Amount accepted.
    pub amount: Money,
    /// Whether the refund already settled.
    pub settled: bool,
}

/// Ground truth about a payment session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Waiting for the client.
    Open,
    /// Payment captured.
    Paid {
        /// Captured amount, if reported.
        amount: Option<Money>,
    },
    /// The last attempt failed.
    Failed {
        /// Provider message.
        reason: Option<String>,
    },
    /// The session expired unpaid.
    Expired,
}

/// Payment provider client.
pub trait PaymentProvider: Send + Sync {
    /// Open a checkout session.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on failure.
    fn create_session(
        &self,
        request: PaymentSessionRequest,
    ) -> BoxFuture<'_, Result<PaymentSession, ProviderError>>;

    /// Refund (part of) a captured payment.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on failure.
    fn refund(&self, request: RefundRequest) -> BoxFuture<'_, Result<RefundReceipt, ProviderError>>;

    /// Query a session's status.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on failure.
    fn payment_status<'a>(
        &'a self,
        payment_ref: &'a str,
    ) -> BoxFuture<'a, Result<PaymentStatus, ProviderError>>;
}

/// Ground truth about a booking's calendar event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchedulingStatus {
    /// The event exists and is active.
    Scheduled {
        /// Event reference.
        scheduling_ref: String,
        /// Start time.
        start: DateTime<Utc>,
        /// End time.
        end: DateTime<Utc>,
    },
    /// The event was cancelled.
    Cancelled {
        /// Reason, if any.
        reason: Option<String>,
    },
    /// The client never completed scheduling.
    NotFound,
}

/// Scheduling provider client.
pub trait SchedulingProvider: Send + Sync {
    /// Find the calendar event belonging to `booking`.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on failure.
    fn lookup<'a>(&'a self, booking: &'a Booking) -> BoxFuture<'a, Result<SchedulingStatus, ProviderError>>;
}

/// Outbound notifications to the participants.
pub trait Notifier: Send + Sync {
    /// Booking confirmed to both parties.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on failure.
    fn send_confirmation<'a>(
        &'a self,
        booking: &'a Booking,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>>;

    /// Something needs the client's attention.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on failure.
    fn notify_client<'a>(
        &'a self,
        booking: &'a Booking,
        reason: crate::directive::NotificationKind,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>>;

    /// The session moved to a new slot.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] on failure.
    fn schedule_updated<'a>(
        &'a self,
        booking: &'a Booking,
        key: &'a DirectiveKey,
    ) -> BoxFuture<'a, Result<(), ProviderError>>;
}
