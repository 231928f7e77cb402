//! Booking entrypoints: create, read, cancel.

use crate::error::AppError;
use crate::extractors::AuthenticatedPrincipal;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use booking_core::booking::{BookingState, BookingView, NewBooking};
use booking_core::ids::BookingId;
use booking_runtime::coordinator::CancellationReceipt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response of `POST /bookings`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedBooking {
    /// New booking.
    pub booking_id: BookingId,
    /// Always `PENDING`.
    pub state: BookingState,
}

/// Body of `POST /bookings/{id}/cancel`.
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    /// Why the booking is cancelled.
    pub reason: String,
}

/// `POST /bookings`
///
/// # Errors
///
/// 400 for a malformed body, 422 for an invalid interval or timezone, 403
/// when the principal may not book for the client.
pub async fn create_booking(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    body: Result<Json<NewBooking>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedBooking>), AppError> {
    let Json(request) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    let view = state.coordinator.create(&principal, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedBooking {
            booking_id: view.booking_id,
            state: view.state,
        }),
    ))
}

/// `GET /bookings/{id}`
///
/// # Errors
///
/// 404 for an unknown booking, 403 for a non-participant.
pub async fn get_booking(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingView>, AppError> {
    let view = state.coordinator.status(&principal, BookingId::from_uuid(id)).await?;
    Ok(Json(view))
}

/// `POST /bookings/{id}/cancel`
///
/// Returns `CANCELLED`, or `CANCELLATION_PENDING` while a refund is still
/// outstanding.
///
/// # Errors
///
/// 409 for a completed booking, plus the errors of [`get_booking`].
pub async fn cancel_booking(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(id): Path<Uuid>,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<CancellationReceipt>, AppError> {
    let Json(request) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    let receipt = state
        .coordinator
        .cancel(&principal, BookingId::from_uuid(id), request.reason)
        .await?;
    Ok(Json(receipt))
}
