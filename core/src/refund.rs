//! Refund policies.
//!
//! How much of a captured payment is returned on cancellation is a business
//! decision, so the dispatcher asks a [`RefundPolicy`]. A payment captured
//! after the booking was already cancelled is always refunded in full and
//! never reaches the policy.

use crate::booking::Booking;
use crate::money::Money;
use chrono::{DateTime, Duration, Utc};

/// Decides the refund amount for a cancelled booking.
pub trait RefundPolicy: Send + Sync {
    /// Amount to refund out of `paid`, given the booking was cancelled at
    /// `cancelled_at`. Must not exceed `paid`.
    fn refund_amount(&self, booking: &Booking, paid: &Money, cancelled_at: DateTime<Utc>) -> Money;
}

/// Refund everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct FullRefund;

impl RefundPolicy for FullRefund {
    fn refund_amount(&self, _booking: &Booking, paid: &Money, _cancelled_at: DateTime<Utc>) -> Money {
        paid.clone()
    }
}

/// Refund by how much notice the cancellation gave.
///
/// At least `full_notice` before the start refunds everything, at least
/// `partial_notice` refunds `partial_percent`, anything later refunds nothing.
///
/// # Examples
///
/// ```
/// use booking_core::refund::NoticeWindowRefund;
/// use chrono::Duration;
///
/// let policy = NoticeWindowRefund::new(Duration::hours(48), Duration::hours(24), 50);
/// assert_eq!(policy.partial_percent, 50);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct NoticeWindowRefund {
    /// Notice for a full refund.
    pub full_notice: Duration,
    /// Notice for a partial refund.
    pub partial_notice: Duration,
    /// Share refunded inside the partial window.
    pub partial_percent: u8,
}

impl NoticeWindowRefund {
    /// Build a policy.
    #[must_use]
    pub const fn new(full_notice: Duration, partial_notice: Duration, partial_percent: u8) -> Self {
        Self {
            full_notice,
            partial_notice,
            partial_percent,
        }
    }
}

impl RefundPolicy for NoticeWindowRefund {
    fn refund_amount(&self, booking: &Booking, paid: &Money, cancelled_at: DateTime<Utc>) -> Money {
        let notice = booking.scheduled_start - cancelled_at;
        if notice >= self.full_notice {
            paid.clone()
        } else if notice >= self.partial_notice {
            paid.percent(self.partial_percent)
        } else {
            paid.zero_like()
        }
    }
}
