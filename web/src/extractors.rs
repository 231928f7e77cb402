//! Custom Axum extractors.
//!
//! Authentication happens in the identity gateway in front of this service.
//! The gateway forwards the caller as two headers:
//!
//! - `X-Principal-Id`: the subject ID
//! - `X-Principal-Roles`: comma-separated roles (`client`, `builder`, `admin`)
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     State(state): State<AppState>,
//!     AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
//! ) -> Result<Json<BookingView>, AppError> {
//!     tracing::info!(principal = %principal.id, "Processing request");
//!     Ok(Json(view))
//! }
//! ```

use crate::error::AppError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use booking_core::principal::{Principal, Role};

/// Header carrying the subject ID.
pub const PRINCIPAL_ID_HEADER: &str = "X-Principal-Id";

/// Header carrying the comma-separated roles.
pub const PRINCIPAL_ROLES_HEADER: &str = "X-Principal-Roles";

/// The caller, as forwarded by the identity gateway.
///
/// Rejects with 401 when no subject is present and 403 when the subject
/// holds no role this service recognises.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal_from_headers(&parts.headers).map(Self)
    }
}

fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, AppError> {
    let id = headers
        .get(PRINCIPAL_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::unauthorized("missing principal"))?;

    // Unknown role names are ignored.
    let roles: Vec<Role> = headers
        .get(PRINCIPAL_ROLES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|roles| roles.split(',').filter_map(Role::parse).collect())
        .unwrap_or_default();

    if roles.is_empty() {
        return Err(AppError::forbidden("principal holds no recognised role"));
    }

    Ok(Principal::new(id, roles))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    fn headers(id: Option<&'static str>, roles: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(id) = id {
            headers.insert(PRINCIPAL_ID_HEADER, HeaderValue::from_static(id));
        }
        if let Some(roles) = roles {
            headers.insert(PRINCIPAL_ROLES_HEADER, HeaderValue::from_static(roles));
        }
        headers
    }

    #[test]
    fn parses_id_and_roles() {
        let principal = principal_from_headers(&headers(Some("alice"), Some("client, Builder"))).unwrap();
        assert_eq!(principal.id, "alice");
        assert_eq!(principal.roles, vec![Role::Client, Role::Builder]);
    }

    #[test]
    fn missing_id_is_unauthorized() {
        let err = principal_from_headers(&headers(None, Some("client"))).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = principal_from_headers(&headers(Some("  "), Some("client"))).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unknown_roles_are_forbidden() {
        let err = principal_from_headers(&headers(Some("alice"), Some("superuser"))).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = principal_from_headers(&headers(Some("alice"), None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
