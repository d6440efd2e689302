//! Span constructors shared across subsystems.
//!
//! Fields declared here are the ones log aggregation keys on; keep names
//! stable.

use tracing::Span;

/// Span covering one dispatched request and its background tasks.
pub fn request_span(request_id: &str, path: &str) -> Span {
    tracing::info_span!("request", request_id = %request_id, path = %path, pod = tracing::field::Empty)
}

/// Span for one garbage collection policy loop.
pub fn gc_span(policy: &'static str, phase: &str) -> Span {
    tracing::info_span!("gc", policy = policy, phase = %phase)
}
