//! Per-request state and body draining.
//!
//! # Responsibilities
//! - Generate the short request ID used in pod names and logs
//! - Drain small bodies into memory so they can travel as an env variable
//! - Carry request-scoped values explicitly through the dispatch chain
//!
//! # Design Decisions
//! - IDs are 5 characters from a vowel-free alphabet: DNS-label safe and
//!   unlikely to spell anything
//! - Bodies of unknown or excessive length are left unread for stdin

use axum::body::{Body, Bytes, HttpBody};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::cgi::env::max_body_env_len;
use crate::http::response::ApiError;
use axum::http::StatusCode;

/// Response header echoing the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

const ID_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const ID_LEN: usize = 5;

pub fn generate_request_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Values scoped to one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: String,
    /// Path of the API definition serving the request.
    pub path: String,
    /// Body, when it was drained.
    pub body: Option<Bytes>,
    pub content_length: Option<u64>,
    pub span: Span,
    /// Cancelled when the request is done with, however it ends.
    pub cancel: CancellationToken,
}

/// A request body after the draining decision.
#[derive(Debug)]
pub enum RequestBody {
    Drained(Bytes),
    Live(Body),
}

/// Exact body length, when the client declared it.
pub fn content_length(body: &Body) -> Option<u64> {
    body.size_hint().exact()
}

/// Read `body` into memory if it is known to fit in the body variable.
pub async fn drain_body(body: Body, content_length: Option<u64>) -> Result<RequestBody, ApiError> {
    let limit = max_body_env_len();
    match content_length {
        Some(len) if len <= limit as u64 => {
            let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
                tracing::info!(error = %e, "Cannot read request body");
                ApiError::new(StatusCode::BAD_REQUEST, "cannot read request body")
            })?;
            Ok(RequestBody::Drained(bytes))
        }
        Some(len) => {
            tracing::info!(content_length = len, limit, "Body too large to drain, leaving it for stdin");
            Ok(RequestBody::Live(body))
        }
        None => {
            tracing::info!("Body length unknown, leaving it for stdin");
            Ok(RequestBody::Live(body))
        }
    }
}
