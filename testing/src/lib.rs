//! # Booking Testing
//!
//! Testing utilities for the booking coordinator.
//!
//! This crate provides:
//! - In-memory implementations of the store, parked-event queue and anomaly
//!   reporter
//! - Fake payment and scheduling providers that honour idempotency keys
//! - Deterministic clocks and ID generators
//! - Fixtures for bookings, envelopes and signed provider payloads
//! - A Given-When-Then API for the transition engine
//!
//! ## Example
//!
//! ```
//! use booking_testing::{TransitionTest, fixtures};
//! use booking_core::booking::BookingState;
//! use booking_core::directive::Directive;
//!
//! TransitionTest::new()
//!     .given(fixtures::pending_booking())
//!     .when(fixtures::scheduling_confirmed("https://cal.test/e/1"))
//!     .then_state(BookingState::AwaitingPayment)
//!     .then_directives(&[Directive::CreatePaymentSession])
//!     .run();
//! ```

use booking_core::environment::{Clock, IdGenerator};
use booking_core::ids::BookingId;
use chrono::{DateTime, Utc};

pub mod provider_mocks;
pub mod store_mocks;

/// Deterministic clocks and ID generators.
pub mod mocks {
    use super::{BookingId, Clock, DateTime, IdGenerator, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use booking_testing::mocks::FixedClock;
    /// use booking_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the
    /// coordinator and advance another.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move forward by `by`.
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a panicking test
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to `time`.
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a panicking test
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)] // Lock poisoning only follows a panicking test
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Predictable booking IDs: `00000000-0000-0000-0000-000000000001`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIdGenerator {
        next: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Start at 1.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn booking_id(&self) -> BookingId {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            BookingId::from_uuid(uuid::Uuid::from_u128(u128::from(n)))
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }

    /// 2025-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Bookings, events and provider payloads for tests.
pub mod fixtures {
    use super::mocks::test_time;
    use booking_core::booking::{Booking, NewBooking};
    use booking_core::event::{BookingEvent, EventEnvelope, EventOrigin};
    use booking_core::ids::{BookingId, BuilderId, ClientId, CorrelationKey, IdempotencyKey, SessionTypeId};
    use booking_core::money::Money;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::{Value, json};

    /// Start of the sessions fixtures book: three days after [`test_time`].
    #[must_use]
    pub fn session_start() -> DateTime<Utc> {
        test_time() + Duration::days(3)
    }

    /// A valid "initiate booking" request for `client-1` with `builder-1`.
    #[must_use]
    pub fn new_booking_request() -> NewBooking {
        NewBooking {
            client_id: ClientId::new("client-1"),
            builder_id: BuilderId::new("builder-1"),
            session_type_id: SessionTypeId::new("mentoring-60"),
            requested_start: session_start(),
            requested_end: session_start() + Duration::hours(1),
            client_timezone: "Europe/Paris".to_string(),
            builder_timezone: Some("America/New_York".to_string()),
        }
    }

    /// A freshly created booking in `PENDING`.
    #[must_use]
    pub fn pending_booking() -> Booking {
        Booking::create(BookingId::new_v4(), new_booking_request(), test_time())
    }

    /// `SchedulingConfirmed` for the fixture slot.
    #[must_use]
    pub fn scheduling_confirmed(scheduling_ref: &str) -> BookingEvent {
        BookingEvent::SchedulingConfirmed {
            scheduling_ref: scheduling_ref.to_string(),
            start: session_start(),
            end: session_start() + Duration::hours(1),
        }
    }

    /// `PaymentSucceeded` for 150.00 USD.
    #[must_use]
    pub fn payment_succeeded(payment_ref: &str) -> BookingEvent {
        BookingEvent::PaymentSucceeded {
            payment_ref: Some(payment_ref.to_string()),
            amount: Some(Money::new(15_000, "usd")),
        }
    }

    /// `CancellationRequested` with `reason`.
    #[must_use]
    pub fn cancellation(reason: &str) -> BookingEvent {
        BookingEvent::CancellationRequested {
            reason: reason.to_string(),
            requested_by: None,
        }
    }

    /// Wrap `event` addressed to `booking_id`.
    #[must_use]
    pub fn envelope(booking_id: BookingId, key: &str, event: BookingEvent) -> EventEnvelope {
        EventEnvelope::new(
            IdempotencyKey::new(key),
            CorrelationKey::Booking(booking_id),
            event,
            EventOrigin::Command,
            test_time(),
        )
    }

    /// Stripe webhook payloads.
    pub mod stripe {
        use super::{BookingId, Value, json};

        /// `checkout.session.completed` with `payment_status = paid`.
        #[must_use]
        pub fn checkout_completed(event_id: &str, booking_id: BookingId, session_id: &str) -> Value {
            json!({
                "id": event_id,
                "type": "checkout.session.completed",
                "created": 1_735_689_600,
                "data": {
                    "object": {
                        "id": session_id,
                        "object": "checkout.session",
                        "client_reference_id": booking_id.to_string(),
                        "payment_status": "paid",
                        "amount_total": 15_000,
                        "currency": "usd",
                        "metadata": { "booking_id": booking_id.to_string() }
                    }
                }
            })
        }

        /// `checkout.session.async_payment_failed`.
        #[must_use]
        pub fn payment_failed(event_id: &str, booking_id: BookingId, session_id: &str) -> Value {
            json!({
                "id": event_id,
                "type": "checkout.session.async_payment_failed",
                "data": {
                    "object": {
                        "id": session_id,
                        "object": "checkout.session",
                        "client_reference_id": booking_id.to_string(),
                        "payment_status": "unpaid"
                    }
                }
            })
        }

        /// `checkout.session.expired`.
        #[must_use]
        pub fn session_expired(event_id: &str, booking_id: BookingId, session_id: &str) -> Value {
            json!({
                "id": event_id,
                "type": "checkout.session.expired",
                "data": {
                    "object": {
                        "id": session_id,
                        "object": "checkout.session",
                        "client_reference_id": booking_id.to_string(),
                        "payment_status": "unpaid"
                    }
                }
            })
        }

        /// `charge.refunded` for a session's payment.
        #[must_use]
        pub fn charge_refunded(event_id: &str, booking_id: BookingId, amount_refunded: i64) -> Value {
            json!({
                "id": event_id,
                "type": "charge.refunded",
                "data": {
                    "object": {
                        "id": "ch_test_1",
                        "object": "charge",
                        "amount_refunded": amount_refunded,
                        "currency": "usd",
                        "metadata": { "booking_id": booking_id.to_string() }
                    }
                }
            })
        }
    }

    /// Calendly webhook payloads.
    pub mod calendly {
        use super::{BookingId, Duration, Value, json, session_start};

        /// `invitee.created` carrying the booking ID in `utm_content`.
        #[must_use]
        pub fn invitee_created(booking_id: BookingId, event_uri: &str, invitee_uri: &str) -> Value {
            let start = session_start();
            json!({
                "event": "invitee.created",
                "created_at": "2025-01-01T00:05:00.000000Z",
                "payload": {
                    "uri": invitee_uri,
                    "event": event_uri,
                    "rescheduled": false,
                    "old_invitee": null,
                    "tracking": { "utm_content": booking_id.to_string() },
                    "scheduled_event": {
                        "uri": event_uri,
                        "start_time": start.to_rfc3339(),
                        "end_time": (start + Duration::hours(1)).to_rfc3339(),
                        "status": "active"
                    }
                }
            })
        }

        /// `invitee.canceled`.
        #[must_use]
        pub fn invitee_canceled(booking_id: BookingId, event_uri: &str, invitee_uri: &str) -> Value {
            json!({
                "event": "invitee.canceled",
                "created_at": "2025-01-01T00:10:00.000000Z",
                "payload": {
                    "uri": invitee_uri,
                    "event": event_uri,
                    "rescheduled": false,
                    "tracking": { "utm_content": booking_id.to_string() },
                    "cancellation": { "reason": "Something came up", "canceled_by": "Client" }
                }
            })
        }
    }
}

/// Test helpers.
pub mod helpers {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    /// Signature header (`t=<unix>,v1=<hex>`) for `body` signed with `secret`,
    /// in the format both providers use.
    #[must_use]
    pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
            return String::new();
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    /// Install a `tracing` subscriber writing to the test harness.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, SequentialIdGenerator, test_clock, test_time};
pub use provider_mocks::{MockPaymentProvider, MockSchedulingProvider, RecordingNotifier, SentNotification};
pub use store_mocks::{InMemoryBookingStore, InMemoryPendingQueue, RecordingAnomalyReporter};
pub use transition_test::TransitionTest;
