//! Custom Axum extractors.
//!
//! - [`AuthenticatedPrincipal`]: the caller, as resolved by the identity gateway
//! - [`IdempotencyKeyHeader`]: the optional `Idempotency-Key` header
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
//!     IdempotencyKeyHeader(key): IdempotencyKeyHeader,
//! ) -> Result<Json<MediaAttachment>, AppError> {
//!     tracing::info!(%principal, ?key, "attaching media");
//!     ...
//! }
//! ```

use crate::error::AppError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use kawach_core::{Principal, StationId, UserId};

/// Principal kind header written by the identity gateway
pub const PRINCIPAL_TYPE_HEADER: &str = "x-principal-type";
/// Principal id header written by the identity gateway
pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
/// Retry token for media uploads
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
/// Request id header, set or propagated by the router
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The authenticated caller.
///
/// Read from `X-Principal-Type` (`user` or `station`) and `X-Principal-Id`.
/// A missing or malformed principal rejects the request with 401.
#[derive(Debug, Clone, PartialEq, Eq)]
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
    let kind = header_str(headers, PRINCIPAL_TYPE_HEADER)
        .ok_or_else(|| AppError::unauthorized("missing principal"))?;
    let id = header_str(headers, PRINCIPAL_ID_HEADER)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::unauthorized("missing principal id"))?;

    match kind.trim().to_ascii_lowercase().as_str() {
        "user" => Ok(Principal::User(UserId::new(id))),
        "station" => Ok(Principal::Station(StationId::new(id))),
        other => {
            tracing::debug!(principal_type = other, "rejected unknown principal type");
            Err(AppError::unauthorized("unknown principal type"))
        }
    }
}

/// The `Idempotency-Key` header, when present and non-blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKeyHeader(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKeyHeader
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = header_str(&parts.headers, IDEMPOTENCY_KEY_HEADER)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        Ok(Self(key))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).expect("Valid request").into_parts().0
    }

    #[tokio::test]
    async fn user_and_station_principals() {
        let mut p = parts(&[("X-Principal-Type", "user"), ("X-Principal-Id", "u1")]);
        let AuthenticatedPrincipal(principal) = AuthenticatedPrincipal::from_request_parts(&mut p, &())
            .await
            .expect("Should extract");
        assert_eq!(principal, Principal::User(UserId::new("u1")));

        let mut p = parts(&[("X-Principal-Type", "Station"), ("X-Principal-Id", " ps-1 ")]);
        let AuthenticatedPrincipal(principal) = AuthenticatedPrincipal::from_request_parts(&mut p, &())
            .await
            .expect("Should extract");
        assert_eq!(principal, Principal::Station(StationId::new("ps-1")));
    }

    #[tokio::test]
    async fn missing_or_malformed_principal_is_unauthorized() {
        for headers in [
            vec![],
            vec![("X-Principal-Type", "user")],
            vec![("X-Principal-Type", "user"), ("X-Principal-Id", "  ")],
            vec![("X-Principal-Type", "admin"), ("X-Principal-Id", "root")],
        ] {
            let mut p = parts(&headers);
            let err = AuthenticatedPrincipal::from_request_parts(&mut p, &())
                .await
                .expect_err("Should reject");
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn idempotency_key_is_optional() {
        let mut p = parts(&[("Idempotency-Key", " k1 ")]);
        let IdempotencyKeyHeader(key) = IdempotencyKeyHeader::from_request_parts(&mut p, &())
            .await
            .expect("Infallible");
        assert_eq!(key.as_deref(), Some("k1"));

        let mut p = parts(&[("Idempotency-Key", "")]);
        let IdempotencyKeyHeader(key) = IdempotencyKeyHeader::from_request_parts(&mut p, &())
            .await
            .expect("Infallible");
        assert_eq!(key, None);
    }
}
