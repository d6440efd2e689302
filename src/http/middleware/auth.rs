//! Pre-shared token authentication.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::response::ApiError;

/// Reject requests whose bearer token is missing (401) or wrong (403).
pub async fn require_bearer(
    State(expected): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Response {
    match bearer_token(request.headers()) {
        None => ApiError::status(StatusCode::UNAUTHORIZED).into_response(),
        Some(token) if token == &*expected => next.run(request).await,
        Some(_) => {
            tracing::info!("Bearer token mismatch");
            ApiError::status(StatusCode::FORBIDDEN).into_response()
        }
    }
}

/// Token from `Authorization: Bearer <token>`; the scheme is case-insensitive.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}
