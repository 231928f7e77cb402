//! Webhook hot-path benchmarks
//!
//! Every delivery pays for signature verification, payload normalization,
//! one transition and one version-checked save:
//! - Signature verification: constant-time HMAC over the raw body
//! - Normalization: serde decode plus mapping to a lifecycle event
//! - Transition: the pure state machine
//! - Submit: reconciler round trip against the in-memory store
//!
//! Run with: `cargo bench -p booking-runtime`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use booking_core::booking::Booking;
use booking_core::environment::UuidGenerator;
use booking_core::ids::BookingId;
use booking_core::machine::transition;
use booking_core::refund::FullRefund;
use booking_runtime::ingestion::{SignatureVerifier, calendly, stripe};
use booking_runtime::{CoordinatorConfig, Reconciler, Services};
use booking_testing::helpers::sign_payload;
use booking_testing::{
    InMemoryBookingStore, InMemoryPendingQueue, MockPaymentProvider, MockSchedulingProvider,
    RecordingAnomalyReporter, RecordingNotifier, fixtures, test_clock, test_time,
};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;

const SECRET: &str = "whsec_bench";

fn stripe_body() -> Vec<u8> {
    serde_json::to_vec(&fixtures::stripe::checkout_completed(
        "evt_bench",
        BookingId::new_v4(),
        "cs_bench",
    ))
    .expect("fixture serializes")
}

fn calendly_body() -> Vec<u8> {
    serde_json::to_vec(&fixtures::calendly::invitee_created(
        BookingId::new_v4(),
        "https://api.calendly.com/scheduled_events/EV1",
        "https://api.calendly.com/scheduled_events/EV1/invitees/IN1",
    ))
    .expect("fixture serializes")
}

/// Benchmark signature verification
fn benchmark_signature(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature");
    group.throughput(Throughput::Elements(1));

    let verifier = SignatureVerifier::new(SECRET);
    let body = stripe_body();
    let header = sign_payload(SECRET, test_time().timestamp(), &body);
    let forged = sign_payload("wrong", test_time().timestamp(), &body);

    group.bench_function("valid", |b| {
        b.iter(|| verifier.verify(black_box(Some(header.as_str())), black_box(&body), test_time()));
    });

    group.bench_function("mismatch", |b| {
        b.iter(|| verifier.verify(black_box(Some(forged.as_str())), black_box(&body), test_time()));
    });

    group.finish();
}

/// Benchmark provider payload normalization
fn benchmark_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    group.throughput(Throughput::Elements(1));

    let stripe_body = stripe_body();
    let calendly_body = calendly_body();

    group.bench_function("stripe_checkout_completed", |b| {
        b.iter(|| stripe::normalize(black_box(&stripe_body), test_time()));
    });

    group.bench_function("calendly_invitee_created", |b| {
        b.iter(|| calendly::normalize(black_box(&calendly_body), test_time()));
    });

    group.finish();
}

/// Benchmark the pure transition function
fn benchmark_transition(c: &mut Criterion) {
    let mut group = c.benchmark_group("transition");
    group.throughput(Throughput::Elements(1));

    let booking = fixtures::pending_booking();
    let confirmed = fixtures::scheduling_confirmed("evt-1");
    let early_payment = fixtures::payment_succeeded("cs_1");

    group.bench_function("accepted", |b| {
        b.iter(|| transition(black_box(&booking), black_box(&confirmed)));
    });

    group.bench_function("rejected", |b| {
        b.iter(|| transition(black_box(&booking), black_box(&early_payment)));
    });

    group.finish();
}

/// Benchmark a full reconciler submit against the in-memory store
fn benchmark_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    let store = InMemoryBookingStore::new();
    let services = Services {
        store: Arc::new(store.clone()),
        pending: Arc::new(InMemoryPendingQueue::new()),
        anomalies: Arc::new(RecordingAnomalyReporter::new()),
        payments: Arc::new(MockPaymentProvider::new()),
        scheduling: Arc::new(MockSchedulingProvider::new()),
        notifier: Arc::new(RecordingNotifier::new()),
        refund_policy: Arc::new(FullRefund),
        clock: Arc::new(test_clock()),
        ids: Arc::new(UuidGenerator),
    };
    let reconciler = Reconciler::new(services, CoordinatorConfig::default());

    group.bench_function("apply_fresh_booking", |b| {
        b.to_async(&runtime).iter(|| async {
            let booking = Booking::create(BookingId::new_v4(), fixtures::new_booking_request(), test_time());
            let id = booking.id;
            store.put(booking);
            let envelope = fixtures::envelope(id, "calendly:bench", fixtures::scheduling_confirmed("evt-1"));
            let _ = reconciler.submit(black_box(envelope)).await;
        });
    });

    group.bench_function("duplicate", |b| {
        let booking = fixtures::pending_booking();
        let id = booking.id;
        store.put(booking);
        let envelope = fixtures::envelope(id, "calendly:dup", fixtures::scheduling_confirmed("evt-1"));
        runtime
            .block_on(reconciler.submit(envelope.clone()))
            .expect("first submit applies");

        b.to_async(&runtime).iter(|| async {
            let _ = reconciler.submit(black_box(envelope.clone())).await;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_signature,
    benchmark_normalize,
    benchmark_transition,
    benchmark_submit,
);
criterion_main!(benches);
