//! Transition engine benchmarks.
//!
//! The engine is recomputed on every optimistic concurrency retry, so it must
//! stay in the sub-microsecond range.
//!
//! Run with: `cargo bench -p booking-core`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use booking_core::booking::{Booking, NewBooking};
use booking_core::event::{BookingEvent, EventEnvelope, EventOrigin};
use booking_core::ids::{BookingId, BuilderId, ClientId, CorrelationKey, IdempotencyKey, SessionTypeId};
use booking_core::machine::transition;
use booking_core::money::Money;
use chrono::{Duration, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn pending_booking() -> Booking {
    let start = Utc::now() + Duration::days(2);
    Booking::create(
        BookingId::new_v4(),
        NewBooking {
            client_id: ClientId::new("client"),
            builder_id: BuilderId::new("builder"),
            session_type_id: SessionTypeId::new("session"),
            requested_start: start,
            requested_end: start + Duration::hours(1),
            client_timezone: "UTC".to_string(),
            builder_timezone: None,
        },
        Utc::now(),
    )
}

fn bench_transition(c: &mut Criterion) {
    let booking = pending_booking();
    let confirmed = BookingEvent::SchedulingConfirmed {
        scheduling_ref: "https://api.calendly.com/scheduled_events/abc".to_string(),
        start: booking.scheduled_start,
        end: booking.scheduled_end,
    };
    let paid = BookingEvent::PaymentSucceeded {
        payment_ref: Some("cs_test_1".to_string()),
        amount: Some(Money::new(15_000, "usd")),
    };

    c.bench_function("transition_accepted", |b| {
        b.iter(|| transition(black_box(&booking), black_box(&confirmed)));
    });

    c.bench_function("transition_rejected", |b| {
        b.iter(|| transition(black_box(&booking), black_box(&paid)));
    });
}

fn bench_full_lifecycle(c: &mut Criterion) {
    let base = pending_booking();
    let events = vec![
        BookingEvent::SchedulingConfirmed {
            scheduling_ref: "evt".to_string(),
            start: base.scheduled_start,
            end: base.scheduled_end,
        },
        BookingEvent::PaymentSucceeded {
            payment_ref: Some("cs".to_string()),
            amount: Some(Money::new(15_000, "usd")),
        },
        BookingEvent::SessionCompleted,
    ];

    c.bench_function("apply_full_lifecycle", |b| {
        b.iter(|| {
            let mut booking = base.clone();
            for (i, event) in events.iter().enumerate() {
                let t = transition(&booking, event).expect("valid lifecycle");
                let envelope = EventEnvelope::new(
                    IdempotencyKey::new(format!("k{i}")),
                    CorrelationKey::Booking(booking.id),
                    event.clone(),
                    EventOrigin::Command,
                    booking.created_at,
                );
                booking.apply(&envelope, &t, booking.created_at);
            }
            black_box(booking)
        });
    });
}

criterion_group!(benches, bench_transition, bench_full_lifecycle);
criterion_main!(benches);
