//! HTTP clients for the external providers.
//!
//! Each client implements one of the provider traits from `booking-core`.
//! Transport failures, timeouts, 429 and 5xx responses map to transient
//! [`ProviderError`]s so the dispatcher retries them; other 4xx responses
//! are permanent rejections.

pub mod calendly;
pub mod notifier;
pub mod stripe;

pub use calendly::CalendlyClient;
pub use notifier::{HttpNotifier, LogNotifier};
pub use stripe::StripeClient;

use booking_core::provider::ProviderError;
use reqwest::{Response, StatusCode};
use std::time::Duration;

/// Header carrying the directive key on mutating calls.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Build the shared HTTP client.
///
/// # Errors
///
/// Returns the builder error if the TLS backend cannot be initialised.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("booking-coordinator/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn transport_error(error: &reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Unavailable(error.to_string())
    }
}

/// Pass successful responses through; classify the rest.
async fn check_status(provider: &str, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(provider, status = status.as_u16(), body = %body, "Provider call failed");

    let message = format!("{provider} returned {status}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(ProviderError::Unavailable(message))
    } else {
        Err(ProviderError::Rejected(message))
    }
}

fn decode_error(provider: &str, error: &reqwest::Error) -> ProviderError {
    ProviderError::Unavailable(format!("{provider} response could not be decoded: {error}"))
}
