//! Calendly payload normalization.
//!
//! `invitee.created` becomes `SchedulingConfirmed`, or `RescheduleDetected`
//! when the invitee replaces an earlier one. `invitee.canceled` becomes
//! `SchedulingCancelled` unless it is the cancellation half of a reschedule.
//! The booking ID travels in `tracking.utm_content`; without it the event
//! URI is used to find the booking. A reschedule is looked up by the event it
//! replaces, since no booking references the new event yet.

use super::{IngestError, Normalized};
use booking_core::event::{BookingEvent, EventEnvelope, EventOrigin, Provider};
use booking_core::ids::{BookingId, CorrelationKey, IdempotencyKey};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CalendlyWebhook {
    event: String,
    #[serde(default)]
    payload: InviteePayload,
}

#[derive(Debug, Default, Deserialize)]
struct InviteePayload {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    rescheduled: bool,
    #[serde(default)]
    old_invitee: Option<String>,
    #[serde(default)]
    tracking: Option<Tracking>,
    #[serde(default)]
    scheduled_event: Option<ScheduledEvent>,
    #[serde(default)]
    cancellation: Option<Cancellation>,
}

#[derive(Debug, Deserialize)]
struct Tracking {
    utm_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduledEvent {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Cancellation {
    reason: Option<String>,
}

impl InviteePayload {
    fn booking_id(&self) -> Option<BookingId> {
        self.tracking
            .as_ref()
            .and_then(|t| t.utm_content.as_deref())
            .and_then(|id| id.parse().ok())
    }

    /// Event URI of the invitee a reschedule replaces. Invitee URIs nest
    /// under their event: `<event uri>/invitees/<uuid>`.
    fn replaced_event(&self) -> Option<&str> {
        self.old_invitee
            .as_deref()
            .and_then(|uri| uri.rsplit_once("/invitees/"))
            .map(|(event, _)| event)
            .filter(|event| !event.is_empty())
    }
}

fn required<'a>(field: Option<&'a String>, name: &str) -> Result<&'a str, IngestError> {
    field
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IngestError::Payload(format!("calendly: invitee payload without {name}")))
}

/// Normalize a Calendly webhook body.
///
/// # Errors
///
/// Returns [`IngestError::Payload`] if the body is not a Calendly webhook or
/// an `invitee.created` lacks its scheduled event.
pub fn normalize(body: &[u8], received_at: DateTime<Utc>) -> Result<Normalized, IngestError> {
    let webhook: CalendlyWebhook =
        serde_json::from_slice(body).map_err(|e| IngestError::Payload(format!("calendly: {e}")))?;
    let payload = &webhook.payload;
    if !matches!(webhook.event.as_str(), "invitee.created" | "invitee.canceled") {
        return Ok(Normalized::Ignored(format!("unhandled calendly event {}", webhook.event)));
    }
    let invitee_uri = required(payload.uri.as_ref(), "uri")?;
    let event_uri = required(payload.event.as_ref(), "event")?;

    let event = match webhook.event.as_str() {
        "invitee.created" => {
            let slot = payload.scheduled_event.as_ref().ok_or_else(|| {
                IngestError::Payload("calendly: invitee.created without scheduled_event".to_string())
            })?;
            if slot.end_time <= slot.start_time {
                return Err(IngestError::Payload("calendly: empty scheduled interval".to_string()));
            }
            if payload.old_invitee.is_some() {
                BookingEvent::RescheduleDetected {
                    scheduling_ref: event_uri.to_string(),
                    start: slot.start_time,
                    end: slot.end_time,
                }
            } else {
                BookingEvent::SchedulingConfirmed {
                    scheduling_ref: event_uri.to_string(),
                    start: slot.start_time,
                    end: slot.end_time,
                }
            }
        },
        "invitee.canceled" if payload.rescheduled => {
            return Ok(Normalized::Ignored(
                "cancellation half of a reschedule".to_string(),
            ));
        },
        _ => BookingEvent::SchedulingCancelled {
            reason: payload.cancellation.as_ref().and_then(|c| c.reason.clone()),
        },
    };

    let target = payload.booking_id().map_or_else(
        || {
            let lookup = match &event {
                BookingEvent::RescheduleDetected { .. } => payload.replaced_event().unwrap_or(event_uri),
                _ => event_uri,
            };
            CorrelationKey::SchedulingRef(lookup.to_string())
        },
        CorrelationKey::Booking,
    );

    Ok(Normalized::Event(EventEnvelope::new(
        IdempotencyKey::new(format!("calendly:{}:{invitee_uri}", webhook.event)),
        target,
        event,
        EventOrigin::Webhook(Provider::Calendly),
        received_at,
    )))
}
