//! Stripe payload normalization.
//!
//! | Stripe event | Booking event |
//! |---|---|
//! | `checkout.session.completed` (paid) | `PaymentSucceeded` |
//! | `checkout.session.async_payment_succeeded` | `PaymentSucceeded` |
//! | `checkout.session.async_payment_failed` | `PaymentFailed` |
//! | `payment_intent.payment_failed` | `PaymentFailed` |
//! | `checkout.session.expired` | `PaymentSessionExpired` |
//! | `charge.refunded` | `RefundSettled` |
//!
//! The booking is addressed by `client_reference_id` or
//! `metadata.booking_id`, falling back to the checkout session ID. The
//! Stripe event ID is the idempotency key.

use super::{IngestError, Normalized};
use booking_core::event::{BookingEvent, EventEnvelope, EventOrigin, Provider};
use booking_core::ids::{BookingId, CorrelationKey, IdempotencyKey};
use booking_core::money::Money;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeData,
}

#[derive(Debug, Deserialize)]
struct StripeData {
    object: StripeObject,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StripeObject {
    id: Option<String>,
    object: Option<String>,
    client_reference_id: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    amount_refunded: Option<i64>,
    currency: Option<String>,
    metadata: HashMap<String, String>,
    last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Deserialize)]
struct PaymentError {
    message: Option<String>,
}

impl StripeObject {
    fn booking_id(&self) -> Option<BookingId> {
        self.client_reference_id
            .as_deref()
            .or_else(|| self.metadata.get("booking_id").map(String::as_str))
            .and_then(|id| id.parse().ok())
    }

    fn session_id(&self) -> Option<&str> {
        match self.object.as_deref() {
            Some("checkout.session") => self.id.as_deref(),
            _ => None,
        }
    }

    fn target(&self) -> Option<CorrelationKey> {
        self.booking_id().map(CorrelationKey::Booking).or_else(|| {
            self.session_id()
                .map(|id| CorrelationKey::PaymentRef(id.to_string()))
        })
    }

    fn amount(&self, cents: Option<i64>) -> Option<Money> {
        Some(Money::new(cents?, self.currency.clone()?))
    }
}

/// Normalize a Stripe webhook body.
///
/// # Errors
///
/// Returns [`IngestError::Payload`] if the body is not a Stripe event or a
/// recognized event lacks a field it needs.
pub fn normalize(body: &[u8], received_at: DateTime<Utc>) -> Result<Normalized, IngestError> {
    let event: StripeEvent =
        serde_json::from_slice(body).map_err(|e| IngestError::Payload(format!("stripe: {e}")))?;
    let object = &event.data.object;

    let booking_event = match event.event_type.as_str() {
        "checkout.session.completed" => match object.payment_status.as_deref() {
            Some("paid" | "no_payment_required") => payment_succeeded(object),
            _ => {
                return Ok(Normalized::Ignored(
                    "checkout completed, payment still processing".to_string(),
                ));
            },
        },
        "checkout.session.async_payment_succeeded" => payment_succeeded(object),
        "checkout.session.async_payment_failed" => BookingEvent::PaymentFailed {
            reason: Some("asynchronous payment failed".to_string()),
        },
        "payment_intent.payment_failed" => BookingEvent::PaymentFailed {
            reason: object
                .last_payment_error
                .as_ref()
                .and_then(|e| e.message.clone()),
        },
        "checkout.session.expired" => BookingEvent::PaymentSessionExpired {
            payment_ref: object
                .session_id()
                .ok_or_else(|| IngestError::Payload("stripe: expired session without id".to_string()))?
                .to_string(),
        },
        "charge.refunded" => BookingEvent::RefundSettled {
            amount: object
                .amount(object.amount_refunded)
                .ok_or_else(|| IngestError::Payload("stripe: refund without amount".to_string()))?,
        },
        other => return Ok(Normalized::Ignored(format!("unhandled stripe event {other}"))),
    };

    let Some(target) = object.target() else {
        return Ok(Normalized::Ignored(format!(
            "stripe {} carries no booking reference",
            event.event_type
        )));
    };

    Ok(Normalized::Event(EventEnvelope::new(
        IdempotencyKey::new(event.id),
        target,
        booking_event,
        EventOrigin::Webhook(Provider::Stripe),
        received_at,
    )))
}

fn payment_succeeded(object: &StripeObject) -> BookingEvent {
    BookingEvent::PaymentSucceeded {
        payment_ref: object.session_id().map(ToString::to_string),
        amount: object.amount(object.amount_total),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use booking_testing::fixtures::stripe;
    use booking_testing::test_time;
    use serde_json::json;

    fn run(value: &serde_json::Value) -> Normalized {
        normalize(value.to_string().as_bytes(), test_time()).unwrap()
    }

    fn event(value: &serde_json::Value) -> EventEnvelope {
        match run(value) {
            Normalized::Event(envelope) => envelope,
            Normalized::Ignored(reason) => panic!("ignored: {reason}"),
        }
    }

    #[test]
    fn checkout_completed_is_payment_succeeded() {
        let id = BookingId::new_v4();
        let envelope = event(&stripe::checkout_completed("evt_1", id, "cs_1"));

        assert_eq!(envelope.idempotency_key, IdempotencyKey::new("evt_1"));
        assert_eq!(envelope.target, CorrelationKey::Booking(id));
        assert_eq!(
            envelope.event,
            BookingEvent::PaymentSucceeded {
                payment_ref: Some("cs_1".to_string()),
                amount: Some(Money::new(15_000, "usd")),
            }
        );
        assert_eq!(envelope.origin, EventOrigin::Webhook(Provider::Stripe));
    }

    #[test]
    fn session_id_addresses_booking_without_reference() {
        let body = json!({
            "id": "evt_2",
            "type": "checkout.session.expired",
            "data": { "object": { "id": "cs_9", "object": "checkout.session" } }
        });
        let envelope = event(&body);
        assert_eq!(envelope.target, CorrelationKey::PaymentRef("cs_9".to_string()));
        assert_eq!(
            envelope.event,
            BookingEvent::PaymentSessionExpired {
                payment_ref: "cs_9".to_string()
            }
        );
    }

    #[test]
    fn failures_and_refunds_map() {
        let id = BookingId::new_v4();
        assert!(matches!(
            event(&stripe::payment_failed("evt_3", id, "cs_1")).event,
            BookingEvent::PaymentFailed { .. }
        ));
        assert_eq!(
            event(&stripe::charge_refunded("evt_4", id, 7_500)).event,
            BookingEvent::RefundSettled {
                amount: Money::new(7_500, "usd")
            }
        );
    }

    #[test]
    fn unpaid_completion_and_unknown_types_are_ignored() {
        let id = BookingId::new_v4();
        let mut body = stripe::checkout_completed("evt_5", id, "cs_1");
        body["data"]["object"]["payment_status"] = json!("unpaid");
        assert!(matches!(run(&body), Normalized::Ignored(_)));

        let body = json!({ "id": "evt_6", "type": "customer.created", "data": { "object": {} } });
        assert!(matches!(run(&body), Normalized::Ignored(_)));
    }

    #[test]
    fn garbage_is_a_payload_error() {
        assert!(matches!(
            normalize(b"not json", test_time()),
            Err(IngestError::Payload(_))
        ));
    }
}
