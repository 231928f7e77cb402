//! Injected dependencies that make the coordinator deterministic under test.
//!
//! All time and identity generation goes through these traits; the
//! transition engine itself never reads the clock.

use crate::ids::BookingId;
use chrono::{DateTime, Utc};

/// Source of the current time.
///
/// # Examples
///
/// ```
/// use booking_core::environment::{Clock, SystemClock};
///
/// let now = SystemClock.now();
/// assert!(now.timestamp() > 0);
/// ```
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of new booking IDs.
pub trait IdGenerator: Send + Sync {
    /// Allocate a fresh ID.
    fn booking_id(&self) -> BookingId;
}

/// Random UUID v4 IDs.
#[derive(Copy, Clone, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn booking_id(&self) -> BookingId {
        BookingId::new_v4()
    }
}
