//! Client-facing error envelope.
//!
//! # Responsibilities
//! - Render every rejection as `{"error": "<message>"}`
//! - Map dispatcher failures to status codes
//!
//! # Design Decisions
//! - An empty message falls back to the lower-cased reason phrase, so a
//!   bare status still produces a readable body
//! - Internal error details are logged, not sent to the client

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::kubernetes::dispatch::DispatchError;

/// A failed request, as the client sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
    error: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Error carrying only the status' default message.
    pub fn status(status: StatusCode) -> Self {
        Self::new(status, "")
    }

    pub fn message(&self) -> String {
        if self.message.is_empty() {
            self.status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_lowercase()
        } else {
            self.message.clone()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.message();
        (self.status, Json(Envelope { error: &message })).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let status = err.status();
        match &err {
            DispatchError::Rejected(_) | DispatchError::LocalRedirect(_) => {
                tracing::info!(error = %err, status = status.as_u16(), "Request rejected");
            }
            DispatchError::PodDeleted(pod) => {
                tracing::error!(pod = %pod, anomaly = true, "Pod deleted while dispatching");
            }
            _ => tracing::error!(error = %err, "Dispatch failed"),
        }
        ApiError::status(status)
    }
}
