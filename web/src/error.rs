//! HTTP rendering of coordinator and ingestion failures.
//!
//! [`AppError`] bridges domain errors and HTTP responses. Every response
//! carries a stable `code` clients can branch on; internal details stay in
//! the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use booking_core::store::StoreError;
use booking_runtime::{CoordinatorError, IngestError};
use serde::Serialize;

/// A failed request: status, stable `code` and a message safe to show.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<BookingView>, AppError> {
///     let view = state.coordinator.status(&principal, id).await?;
///     Ok(Json(view))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
}

impl AppError {
    /// Arbitrary status and code.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    /// Malformed request or webhook payload.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// Missing or unparseable principal headers.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "UNAUTHORIZED")
    }

    /// Principal may not act on this booking.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message, "FORBIDDEN")
    }

    /// 404.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND")
    }

    /// The booking's state does not allow the action; `code` says why.
    #[must_use]
    pub fn conflict(message: impl Into<String>, code: &'static str) -> Self {
        Self::new(StatusCode::CONFLICT, message, code)
    }

    /// Well-formed request with invalid fields.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "VALIDATION_ERROR")
    }

    /// Anything the caller cannot fix. Log the cause before calling this.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_SERVER_ERROR")
    }

    /// A dependency is down; retrying later may succeed.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "SERVICE_UNAVAILABLE")
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// JSON body of an error response.
#[derive(Serialize)]
struct ErrorResponse<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Self { status, message, code } = self;
        if status.is_server_error() {
            tracing::error!(%status, code, %message, "Request failed");
        } else {
            tracing::debug!(%status, code, %message, "Request rejected");
        }
        (status, Json(ErrorResponse { code, message: &message })).into_response()
    }
}

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        match &err {
            CoordinatorError::NotFound(id) => Self::not_found(format!("booking {id} not found")),
            CoordinatorError::Forbidden { .. } | CoordinatorError::CreateForbidden(_) => Self::forbidden(err.to_string()),
            CoordinatorError::Validation(e) => Self::validation(e.to_string()),
            CoordinatorError::InvalidTransition(e) => Self::conflict(e.to_string(), "INVALID_TRANSITION"),
            CoordinatorError::ConflictRetriesExhausted { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string(), "VERSION_CONFLICT")
            },
            CoordinatorError::Store(StoreError::Unavailable(_)) => {
                tracing::warn!(error = %err, "Store unavailable");
                Self::unavailable("booking store unavailable")
            },
            CoordinatorError::Store(_) => {
                tracing::error!(error = %err, "Store failure");
                Self::internal("internal error")
            },
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            // The reason stays in the logs; the sender learns only that it failed.
            IngestError::Signature(_) => Self::new(
                StatusCode::BAD_REQUEST,
                "signature verification failed",
                "SIGNATURE_VERIFICATION_FAILED",
            ),
            IngestError::Payload(reason) => Self::new(StatusCode::BAD_REQUEST, reason, "INVALID_PAYLOAD"),
            IngestError::Coordinator(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "Webhook not persisted, provider should redeliver");
                Self::unavailable("try again later")
            },
            IngestError::Coordinator(e) => Self::from(e),
        }
    }
}
