//! Axum HTTP surface for the booking coordinator.
//!
//! The handlers are a thin shell: they extract the principal and the body,
//! call [`BookingCoordinator`](booking_runtime::BookingCoordinator) or
//! [`WebhookIngestor`](booking_runtime::WebhookIngestor), and map the result
//! through [`AppError`].
//!
//! # Routes
//!
//! | Method & path | Handler |
//! |---|---|
//! | `POST /bookings` | [`handlers::bookings::create_booking`] |
//! | `GET /bookings/:id` | [`handlers::bookings::get_booking`] |
//! | `POST /bookings/:id/cancel` | [`handlers::bookings::cancel_booking`] |
//! | `POST /webhooks/calendly` | [`handlers::webhooks::calendly_webhook`] |
//! | `POST /webhooks/stripe` | [`handlers::webhooks::stripe_webhook`] |
//! | `GET /health` | [`handlers::health::health_check`] |
//! | `GET /health/ready` | [`handlers::health::readiness`] |
//!
//! # Example
//!
//! ```ignore
//! use booking_web::{router, AppState};
//!
//! let state = AppState::new(coordinator, calendly_verifier, stripe_verifier);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use error::AppError;
pub use extractors::AuthenticatedPrincipal;
pub use middleware::{request_id_layer, RequestId, REQUEST_ID_HEADER};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bookings", post(handlers::bookings::create_booking))
        .route("/bookings/:id", get(handlers::bookings::get_booking))
        .route("/bookings/:id/cancel", post(handlers::bookings::cancel_booking))
        .route("/webhooks/calendly", post(handlers::webhooks::calendly_webhook))
        .route("/webhooks/stripe", post(handlers::webhooks::stripe_webhook))
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness))
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}
