//! # Booking Core
//!
//! Domain types and the pure transition engine for the booking lifecycle
//! coordinator.
//!
//! A booking on the marketplace involves three systems that each hold part of
//! the truth: the scheduling provider (the slot), the payment provider (the
//! money) and the marketplace itself. This crate defines the single record
//! that reconciles them and the rules by which it may change.
//!
//! ## Core Concepts
//!
//! - **Booking**: the aggregate root, with its append-only history, applied
//!   idempotency keys and directive ledger ([`booking`])
//! - **Event**: a normalized lifecycle fact, wrapped in an envelope carrying
//!   its idempotency key and provenance ([`event`])
//! - **Transition**: the pure function `(booking, event) → next state +
//!   directives` ([`machine`])
//! - **Directive**: a side effect described as a value, executed later by the
//!   dispatcher exactly once per key ([`directive`])
//! - **Collaborators**: the store, the parked-event queue, providers, the
//!   anomaly reporter and the refund policy, all injected as traits
//!
//! ## Architecture Principles
//!
//! - Functional core: the engine performs no I/O and reads no clock
//! - Explicit effects: directives are recorded with the transition (outbox)
//! - Optimistic concurrency: every write is checked against the loaded version
//!
//! ## Example
//!
//! ```
//! use booking_core::booking::{Booking, BookingState, NewBooking};
//! use booking_core::event::BookingEvent;
//! use booking_core::ids::{BookingId, BuilderId, ClientId, SessionTypeId};
//! use booking_core::machine::{Rejection, transition};
//! use chrono::{Duration, Utc};
//!
//! let start = Utc::now() + Duration::days(1);
//! let booking = Booking::create(
//!     BookingId::new_v4(),
//!     NewBooking {
//!         client_id: ClientId::new("client-1"),
//!         builder_id: BuilderId::new("builder-1"),
//!         session_type_id: SessionTypeId::new("intro"),
//!         requested_start: start,
//!         requested_end: start + Duration::hours(1),
//!         client_timezone: "UTC".to_string(),
//!         builder_timezone: None,
//!     },
//!     Utc::now(),
//! );
//!
//! // Payment cannot apply before the slot is confirmed.
//! let paid = BookingEvent::PaymentSucceeded { payment_ref: None, amount: None };
//! let rejected = transition(&booking, &paid).unwrap_err();
//! assert_eq!(rejected.rejection, Rejection::AwaitingPrerequisite);
//! assert_eq!(booking.state, BookingState::Pending);
//! ```

pub use chrono::{DateTime, Utc};

pub mod anomaly;
pub mod booking;
pub mod directive;
pub mod environment;
pub mod event;
pub mod ids;
pub mod machine;
pub mod money;
pub mod pending;
pub mod principal;
pub mod provider;
pub mod refund;
pub mod store;

pub use anomaly::{Anomaly, AnomalyKind, AnomalyReporter};
pub use booking::{Booking, BookingState, BookingView, CancellationStatus, NewBooking, PaymentState};
pub use directive::{Directive, DirectiveOutcome, DirectiveRecord, DirectiveStatus};
pub use environment::{Clock, IdGenerator, SystemClock, UuidGenerator};
pub use event::{BookingEvent, EventEnvelope, EventKind, EventOrigin, Provider};
pub use ids::{BookingId, CorrelationKey, DirectiveKey, IdempotencyKey, Version};
pub use machine::{InvalidTransition, Rejection, Transition, transition};
pub use money::Money;
pub use pending::{ParkedEvent, PendingEventQueue};
pub use store::{BookingFilter, BookingStore, BoxFuture, StoreError};
