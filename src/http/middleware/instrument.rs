//! Per-handler request metrics.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::observability::Metrics;

/// Status recorded for requests whose client went away mid-flight.
const CLIENT_CLOSED: u16 = 499;

/// Metrics handle plus the handler label to record under.
#[derive(Clone)]
pub struct Instrumented {
    pub metrics: Metrics,
    pub handler: Arc<str>,
}

struct Inflight<'a> {
    state: &'a Instrumented,
    started: Instant,
    code: Option<u16>,
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        self.state.metrics.request_finished(
            &self.state.handler,
            self.code.unwrap_or(CLIENT_CLOSED),
            self.started.elapsed(),
        );
    }
}

pub async fn instrument(State(state): State<Instrumented>, request: Request, next: Next) -> Response {
    state.metrics.request_started(&state.handler);
    let mut inflight = Inflight {
        state: &state,
        started: Instant::now(),
        code: None,
    };

    let response = next.run(request).await;
    inflight.code = Some(response.status().as_u16());
    response
}
