//! End-to-end booking lifecycles over in-memory fakes.
//!
//! Each test drives the coordinator the way the HTTP layer does: create,
//! then deliver provider events, then dispatch what they scheduled.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use booking_core::booking::{BookingState, CancellationStatus, PaymentState};
use booking_core::event::EventOrigin;
use booking_core::money::Money;
use booking_runtime::SubmitOutcome;
use booking_testing::{SentNotification, fixtures};
use chrono::Duration;
use common::{client, harness};

#[tokio::test]
async fn booking_runs_from_creation_to_completion() {
    let h = harness();
    let view = h
        .coordinator
        .create(&client(), fixtures::new_booking_request())
        .await
        .unwrap();
    let id = view.booking_id;
    assert_eq!(view.state, BookingState::Pending);

    let outcome = h
        .coordinator
        .submit(fixtures::envelope(id, "calendly:1", fixtures::scheduling_confirmed("evt-1")))
        .await
        .unwrap();
    assert_eq!(outcome.dispatch_target(), Some(id));
    h.coordinator.dispatch(id).await.unwrap();

    let booking = h.store.get(id).unwrap();
    assert_eq!(booking.state, BookingState::AwaitingPayment);
    let payment_ref = booking.external_payment_ref.clone().unwrap();
    assert!(booking.checkout_url.is_some());

    h.coordinator
        .submit(fixtures::envelope(id, "stripe:evt_1", fixtures::payment_succeeded(&payment_ref)))
        .await
        .unwrap();
    h.coordinator.dispatch(id).await.unwrap();

    let booking = h.store.get(id).unwrap();
    assert_eq!(booking.state, BookingState::Confirmed);
    assert_eq!(booking.payment_state, PaymentState::Paid);
    assert_eq!(h.notifier.sent(), vec![SentNotification::Confirmation(id)]);

    // The session ends; the recovery sweep marks it completed.
    h.clock.advance(Duration::days(3) + Duration::hours(3));
    h.recovery.sweep().await;

    let booking = h.store.get(id).unwrap();
    assert_eq!(booking.state, BookingState::Completed);
    assert_eq!(booking.state_history.len(), 4);
    assert_eq!(booking.state_history[3].origin, EventOrigin::Synthetic);
}

#[tokio::test]
async fn replayed_webhook_changes_nothing() {
    let h = harness();
    let id = h
        .coordinator
        .create(&client(), fixtures::new_booking_request())
        .await
        .unwrap()
        .booking_id;
    let confirmed = fixtures::envelope(id, "calendly:1", fixtures::scheduling_confirmed("evt-1"));

    h.coordinator.submit(confirmed.clone()).await.unwrap();
    h.coordinator.dispatch(id).await.unwrap();
    let before = h.store.get(id).unwrap();

    for _ in 0..3 {
        let outcome = h.coordinator.submit(confirmed.clone()).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Duplicate { booking_id: id });
        h.coordinator.dispatch(id).await.unwrap();
    }

    let after = h.store.get(id).unwrap();
    assert_eq!(after.state_history, before.state_history);
    assert_eq!(after.version, before.version);
    assert_eq!(h.payments.sessions_created(), 1);
}

#[tokio::test]
async fn late_payment_after_cancellation_is_refunded_once() {
    let h = harness();
    let id = h
        .coordinator
        .create(&client(), fixtures::new_booking_request())
        .await
        .unwrap()
        .booking_id;
    h.coordinator
        .submit(fixtures::envelope(id, "calendly:1", fixtures::scheduling_confirmed("evt-1")))
        .await
        .unwrap();
    h.coordinator.dispatch(id).await.unwrap();
    let payment_ref = h.store.get(id).unwrap().external_payment_ref.unwrap();

    let receipt = h
        .coordinator
        .cancel(&client(), id, "changed my mind".to_string())
        .await
        .unwrap();
    assert_eq!(receipt.state, CancellationStatus::Cancelled);
    assert!(h.payments.refunds().is_empty());

    let late = fixtures::envelope(id, "stripe:evt_late", fixtures::payment_succeeded(&payment_ref));
    h.coordinator.submit(late.clone()).await.unwrap();
    h.coordinator.dispatch(id).await.unwrap();
    h.coordinator.submit(late).await.unwrap();
    h.coordinator.dispatch(id).await.unwrap();

    let refunds = h.payments.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, Money::new(15_000, "usd"));

    let booking = h.store.get(id).unwrap();
    assert_eq!(booking.state, BookingState::Cancelled);
    assert!(booking.captured_after_cancellation());
    assert!(booking.refund_pending);
}

#[tokio::test]
async fn cancelling_a_paid_booking_reports_pending_refund() {
    let h = harness();
    let id = h
        .coordinator
        .create(&client(), fixtures::new_booking_request())
        .await
        .unwrap()
        .booking_id;
    h.coordinator
        .submit(fixtures::envelope(id, "calendly:1", fixtures::scheduling_confirmed("evt-1")))
        .await
        .unwrap();
    h.coordinator.dispatch(id).await.unwrap();
    let payment_ref = h.store.get(id).unwrap().external_payment_ref.unwrap();
    h.coordinator
        .submit(fixtures::envelope(id, "stripe:evt_1", fixtures::payment_succeeded(&payment_ref)))
        .await
        .unwrap();

    let receipt = h
        .coordinator
        .cancel(&client(), id, "conflict".to_string())
        .await
        .unwrap();

    assert_eq!(receipt.state, CancellationStatus::CancellationPending);
    assert_eq!(h.payments.refunds().len(), 1);
    let view = h.coordinator.status(&client(), id).await.unwrap();
    assert_eq!(view.state, BookingState::Cancelled);
    assert_eq!(view.refund_amount, Some(Money::new(15_000, "usd")));
}
