//! Caller identity and authorization rules for the booking entrypoints.
//!
//! Authentication happens upstream; the coordinator only receives an
//! already-authenticated [`Principal`] and decides what it may do.

use crate::booking::{Booking, NewBooking};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a principal holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Books sessions.
    Client,
    /// Delivers sessions.
    Builder,
    /// Marketplace operator.
    Admin,
}

impl Role {
    /// Parse a role name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Some(Self::Client),
            "builder" => Some(Self::Builder),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Builder => "builder",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Subject ID, matched against client and builder IDs.
    pub id: String,
    /// Granted roles.
    pub roles: Vec<Role>,
}

impl Principal {
    /// Build a principal.
    #[must_use]
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().collect(),
        }
    }

    /// Whether the principal holds `role`.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    fn is_client_of(&self, booking: &Booking) -> bool {
        self.has_role(Role::Client) && booking.client_id.as_str() == self.id
    }

    fn is_builder_of(&self, booking: &Booking) -> bool {
        self.has_role(Role::Builder) && booking.builder_id.as_str() == self.id
    }

    /// Clients book for themselves; admins for anyone.
    #[must_use]
    pub fn can_create(&self, request: &NewBooking) -> bool {
        self.has_role(Role::Admin)
            || (self.has_role(Role::Client) && request.client_id.as_str() == self.id)
    }

    /// Participants and admins can read a booking.
    #[must_use]
    pub fn can_view(&self, booking: &Booking) -> bool {
        self.has_role(Role::Admin) || self.is_client_of(booking) || self.is_builder_of(booking)
    }

    /// Participants and admins can cancel a booking.
    #[must_use]
    pub fn can_cancel(&self, booking: &Booking) -> bool {
        self.can_view(booking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{BookingId, BuilderId, ClientId, SessionTypeId};
    use chrono::{Duration, Utc};

    fn request(client: &str) -> NewBooking {
        let start = Utc::now() + Duration::days(2);
        NewBooking {
            client_id: ClientId::new(client),
            builder_id: BuilderId::new("builder-9"),
            session_type_id: SessionTypeId::new("review"),
            requested_start: start,
            requested_end: start + Duration::minutes(45),
            client_timezone: "America/New_York".to_string(),
            builder_timezone: Some("Europe/Berlin".to_string()),
        }
    }

    #[test]
    fn clients_only_book_for_themselves() {
        let alice = Principal::new("alice", [Role::Client]);
        assert!(alice.can_create(&request("alice")));
        assert!(!alice.can_create(&request("bob")));
        assert!(Principal::new("ops", [Role::Admin]).can_create(&request("bob")));
    }

    #[test]
    fn participants_can_view_and_cancel() {
        let booking = Booking::create(BookingId::new_v4(), request("alice"), Utc::now());
        assert!(Principal::new("alice", [Role::Client]).can_cancel(&booking));
        assert!(Principal::new("builder-9", [Role::Builder]).can_view(&booking));
        assert!(!Principal::new("mallory", [Role::Client]).can_view(&booking));
        assert!(!Principal::new("alice", [Role::Builder]).can_view(&booking));
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!(Role::parse(" Admin "), Some(Role::Admin));
        assert_eq!(Role::parse("root"), None);
    }
}
