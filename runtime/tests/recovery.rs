//! Recovery sweeps repairing bookings whose webhooks never arrived.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use booking_core::booking::{BookingState, PaymentState};
use booking_core::directive::DirectiveStatus;
use booking_core::event::{EventKind, EventOrigin};
use booking_core::money::Money;
use booking_core::pending::{ParkedEvent, PendingEventQueue};
use booking_core::provider::{PaymentStatus, ProviderError};
use booking_testing::{SentNotification, fixtures, test_time};
use chrono::Duration;
use common::{client, harness};

#[tokio::test]
async fn missed_payment_webhook_is_recovered_from_the_provider() {
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

    h.payments.set_status(
        &payment_ref,
        PaymentStatus::Paid {
            amount: Some(Money::new(15_000, "usd")),
        },
    );
    h.clock.advance(Duration::minutes(20));

    let report = h.recovery.sweep().await;

    assert_eq!(report.synthetic_applied, 1);
    let booking = h.store.get(id).unwrap();
    assert_eq!(booking.state, BookingState::Confirmed);
    assert_eq!(booking.payment_state, PaymentState::Paid);
    let last = booking.state_history.last().unwrap();
    assert_eq!(last.event, EventKind::PaymentSucceeded);
    assert_eq!(last.origin, EventOrigin::Synthetic);
    assert_eq!(h.notifier.sent(), vec![SentNotification::Confirmation(id)]);

    // A late webhook for the same capture is recognized as already applied.
    let late = h
        .coordinator
        .submit(fixtures::envelope(id, "stripe:evt_1", fixtures::payment_succeeded(&payment_ref)))
        .await
        .unwrap();
    assert_eq!(late.label(), "already_satisfied");
}

#[tokio::test]
async fn open_checkout_is_left_waiting() {
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
    h.clock.advance(Duration::minutes(20));

    let report = h.recovery.sweep().await;

    assert_eq!(report.synthetic_applied, 0);
    assert_eq!(h.store.get(id).unwrap().state, BookingState::AwaitingPayment);
}

#[tokio::test]
async fn expired_checkout_gets_a_replacement_session() {
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
    let first_ref = h.store.get(id).unwrap().external_payment_ref.unwrap();
    h.payments.set_status(&first_ref, PaymentStatus::Expired);
    h.clock.advance(Duration::minutes(20));

    h.recovery.sweep().await;

    let booking = h.store.get(id).unwrap();
    assert_eq!(booking.state, BookingState::AwaitingPayment);
    assert!(booking.payment_ref_replaced);
    assert_ne!(booking.external_payment_ref.as_deref(), Some(first_ref.as_str()));
    assert_eq!(h.payments.sessions_created(), 2);
}

#[tokio::test]
async fn undispatched_directive_is_driven_by_the_next_sweep() {
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

    // The first dispatch never happened (process crashed after the save).
    assert!(h.store.get(id).unwrap().scheduled_directives().next().is_some());

    let report = h.recovery.sweep().await;

    assert_eq!(report.directives_executed, 1);
    let booking = h.store.get(id).unwrap();
    assert!(booking.external_payment_ref.is_some());
    assert!(booking.scheduled_directives().next().is_none());
}

#[tokio::test]
async fn provider_outage_leaves_booking_for_the_next_sweep() {
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
    h.clock.advance(Duration::minutes(20));
    h.payments
        .fail_next(1, ProviderError::Unavailable("stripe down".to_string()));

    let first = h.recovery.sweep().await;
    assert_eq!(first.provider_errors, 1);
    assert_eq!(h.store.get(id).unwrap().state, BookingState::AwaitingPayment);

    h.payments.set_status(&payment_ref, PaymentStatus::Paid { amount: None });
    let second = h.recovery.sweep().await;
    assert_eq!(second.synthetic_applied, 1);
    assert_eq!(h.store.get(id).unwrap().state, BookingState::Confirmed);
}

#[tokio::test]
async fn failed_directive_is_left_for_an_operator() {
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
    h.payments
        .fail_next(3, ProviderError::Unavailable("stripe down".to_string()));
    h.coordinator.dispatch(id).await.unwrap();
    assert!(matches!(
        h.store.get(id).unwrap().directives[0].status,
        DirectiveStatus::Failed { .. }
    ));

    let report = h.recovery.sweep().await;

    assert_eq!(report.directives_executed, 0);
    assert_eq!(h.payments.session_calls(), 3);
    let booking = h.store.get(id).unwrap();
    assert!(booking.anomaly.is_some());
    assert!(booking.external_payment_ref.is_none());
}

#[tokio::test]
async fn stale_parked_cancellation_applies_before_payment() {
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

    // Delivered while the coordinator could not apply them; the payment came first.
    let parked_at = test_time() - Duration::minutes(10);
    let mut payment = fixtures::envelope(id, "stripe:evt_1", fixtures::payment_succeeded(&payment_ref));
    payment.received_at = test_time() - Duration::minutes(9);
    let mut cancel = fixtures::envelope(id, "cancel-1", fixtures::cancellation("changed plans"));
    cancel.received_at = test_time() - Duration::minutes(8);
    for envelope in [payment, cancel] {
        h.pending.park(ParkedEvent::new(envelope, parked_at)).await.unwrap();
    }

    let report = h.recovery.sweep().await;

    assert_eq!(report.parked_retried, 2);
    let booking = h.store.get(id).unwrap();
    assert_eq!(booking.state, BookingState::Cancelled);
    assert!(
        booking
            .state_history
            .iter()
            .all(|entry| entry.state != BookingState::Confirmed),
        "payment was applied before the cancellation"
    );
    assert!(h.pending.entries().is_empty());
}
