//! Identifier and versioning types for the booking aggregate.
//!
//! Every identifier that crosses a component boundary is a newtype so that a
//! scheduling reference can never be passed where a booking ID is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when parsing an identifier from untrusted input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

/// Unique identifier of a booking.
///
/// Generated once at creation (UUID v4) and never changed.
///
/// # Examples
///
/// ```
/// use booking_core::ids::BookingId;
///
/// let id = BookingId::new_v4();
/// let parsed: BookingId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random booking ID.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BookingId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ParseIdError(format!("'{s}' is not a booking id")))
    }
}

/// Declares an opaque string identifier owned by another system.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create the identifier from trusted input.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.trim().is_empty() {
                    return Err(ParseIdError(format!(
                        "{} cannot be empty",
                        stringify!($name)
                    )));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

opaque_id!(
    /// The client (buyer) who requested the booking.
    ClientId
);
opaque_id!(
    /// The builder (seller) delivering the session.
    BuilderId
);
opaque_id!(
    /// Catalog entry describing the kind of session being booked.
    SessionTypeId
);
opaque_id!(
    /// Token identifying one logical event, used to discard duplicate deliveries.
    ///
    /// Webhooks use the provider's event ID; synthetic and command events
    /// derive a deterministic key so that concurrent producers collide.
    IdempotencyKey
);

/// Deterministic key of one directive execution.
///
/// Derived from `(booking_id, directive name, history length)` so that the
/// same logical transition always produces the same key, and passed to the
/// external provider as its idempotency key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectiveKey(String);

impl DirectiveKey {
    /// Derive the key for a directive emitted by the transition that produced
    /// history entry number `history_len`.
    #[must_use]
    pub fn derive(booking_id: BookingId, directive_name: &str, history_len: usize) -> Self {
        Self(format!("{booking_id}:{directive_name}:{history_len}"))
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version number for optimistic concurrency control.
///
/// A booking that has never been saved is at [`Version::INITIAL`]. Every
/// successful save increments the version by one.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of a booking that does not exist in the store yet.
    pub const INITIAL: Self = Self(0);

    /// Create a version from a raw counter.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw counter value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an inbound event finds its booking.
///
/// First-contact scheduling webhooks may only carry the provider's event URI,
/// so events are addressed either directly or through an external reference.
/// The same key addresses entries in the parked-event queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CorrelationKey {
    /// Booking ID embedded in the payload.
    Booking(BookingId),
    /// Scheduling provider event reference.
    SchedulingRef(String),
    /// Payment provider session reference.
    PaymentRef(String),
}

impl CorrelationKey {
    /// Stable discriminator used by persistent queues.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Booking(_) => "booking",
            Self::SchedulingRef(_) => "scheduling_ref",
            Self::PaymentRef(_) => "payment_ref",
        }
    }

    /// The addressed value as a string.
    #[must_use]
    pub fn value(&self) -> String {
        match self {
            Self::Booking(id) => id.to_string(),
            Self::SchedulingRef(r) | Self::PaymentRef(r) => r.clone(),
        }
    }

    /// Rebuild a key from its persisted `(kind, value)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`ParseIdError`] for an unknown kind or malformed booking ID.
    pub fn from_parts(kind: &str, value: &str) -> Result<Self, ParseIdError> {
        match kind {
            "booking" => value.parse().map(Self::Booking),
            "scheduling_ref" => Ok(Self::SchedulingRef(value.to_string())),
            "payment_ref" => Ok(Self::PaymentRef(value.to_string())),
            other => Err(ParseIdError(format!("unknown correlation kind '{other}'"))),
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.value())
    }
}
