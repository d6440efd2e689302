//! Supervised background tasks.
//!
//! Errors and panics from a background task are logged under the task's
//! name instead of vanishing with its `JoinHandle`.

use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument;

/// Spawn `task`, logging its outcome. Runs in the caller's current span.
pub fn spawn_supervised<F, E>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let inner = tokio::spawn(task.in_current_span());
    tokio::spawn(
        async move {
            match inner.await {
                Ok(Ok(())) => tracing::debug!(task = name, "Task finished"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task failed"),
                Err(e) if e.is_panic() => tracing::error!(task = name, "Task panicked"),
                Err(_) => tracing::debug!(task = name, "Task aborted"),
            }
        }
        .in_current_span(),
    )
}
