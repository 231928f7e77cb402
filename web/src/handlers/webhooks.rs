//! Provider webhook endpoints.
//!
//! A delivery is acknowledged only once its effect is durable. Directives
//! the delivery scheduled run afterwards on a background task, so a slow
//! payment provider never makes the sender time out and redeliver.

use crate::error::AppError;
use crate::state::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use booking_core::event::Provider;
use booking_core::ids::BookingId;
use booking_runtime::{BookingCoordinator, IngestOutcome};
use serde::{Deserialize, Serialize};

/// Signature header sent by Calendly.
pub const CALENDLY_SIGNATURE_HEADER: &str = "Calendly-Webhook-Signature";

/// Signature header sent by Stripe.
pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Acknowledgement body.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    /// `applied`, `duplicate`, `parked`, `ignored`, ...
    pub outcome: String,
}

/// `POST /webhooks/calendly`
///
/// # Errors
///
/// 400 on signature or payload failure, 503 when the delivery could not be
/// persisted.
pub async fn calendly_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    receive(&state, Provider::Calendly, signature(&headers, CALENDLY_SIGNATURE_HEADER), &body).await
}

/// `POST /webhooks/stripe`
///
/// # Errors
///
/// See [`calendly_webhook`].
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    receive(&state, Provider::Stripe, signature(&headers, STRIPE_SIGNATURE_HEADER), &body).await
}

fn signature<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn receive(
    state: &AppState,
    provider: Provider,
    signature: Option<&str>,
    body: &[u8],
) -> Result<Json<WebhookAck>, AppError> {
    let outcome = state.ingestor.ingest(provider, signature, body).await?;

    if let IngestOutcome::Submitted(submitted) = &outcome {
        if let Some(booking_id) = submitted.dispatch_target() {
            spawn_dispatch(state.coordinator.clone(), booking_id);
        }
    }

    Ok(Json(WebhookAck {
        outcome: outcome.label().to_string(),
    }))
}

/// Run the booking's scheduled directives off the request path. Failures
/// stay scheduled for the recovery sweep.
fn spawn_dispatch(coordinator: BookingCoordinator, booking_id: BookingId) {
    tokio::spawn(async move {
        match coordinator.dispatch(booking_id).await {
            Ok(report) => tracing::debug!(%booking_id, ?report, "Background dispatch finished"),
            Err(e) => tracing::warn!(%booking_id, error = %e, "Background dispatch failed"),
        }
    });
}
