//! Request ID propagation.
//!
//! Every request gets an ID: the caller's `X-Request-Id` when it sends a
//! usable one, a fresh UUID otherwise. The ID is stored in the request
//! extensions, recorded on a tracing span that wraps the handler, and echoed
//! in the response header so webhook deliveries can be matched to log lines.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use booking_web::middleware::request_id_layer;
//!
//! let app = Router::new()
//!     .route("/health", get(health_check))
//!     .layer(request_id_layer());
//! ```

use axum::{extract::Request, http::HeaderValue, response::Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Longest caller-supplied ID that is kept.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Request ID stored in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Create a layer that adds request ID tracking to all requests.
#[must_use]
pub const fn request_id_layer() -> RequestIdLayer {
    RequestIdLayer
}

/// Layer for request ID tracking.
#[derive(Clone, Copy, Debug)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdMiddleware { inner }
    }
}

/// Middleware service for request ID tracking.
#[derive(Clone, Debug)]
pub struct RequestIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for RequestIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future =
        std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|id| is_usable(id))
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

        req.extensions_mut().insert(RequestId(request_id.clone()));

        let span = tracing::info_span!(
            "http_request",
            request_id = %request_id,
            method = %req.method(),
            uri = %req.uri(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }

            Ok(response)
        })
    }
}

fn is_usable(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{body::Body, extract::Extension, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/test", get(|Extension(id): Extension<RequestId>| async move { id.0 }))
            .layer(request_id_layer())
    }

    #[tokio::test]
    async fn request_id_generated_if_missing() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = app().oneshot(request).await.unwrap();

        let id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("request ID header should be present");
        assert!(Uuid::parse_str(id.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn caller_request_id_is_preserved() {
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, "req_abc-123")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req_abc-123");
    }

    #[tokio::test]
    async fn unusable_request_id_is_replaced() {
        let request = Request::builder()
            .uri("/test")
            .header(REQUEST_ID_HEADER, "has spaces")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let id = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert_ne!(id, "has spaces");
        assert!(Uuid::parse_str(id).is_ok());
    }
}
