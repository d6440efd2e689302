//! Replays and tails the Kubernetes Events of one pod into the log.
//!
//! Purely observational: nothing on the response path waits for it.

use k8s_openapi::api::core::v1::Event as PodEvent;
use kube::Api;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::kubernetes::watch::{Event, Selector, WatchError, Watcher};

/// Log past and future events for the object with `uid` until cancelled.
pub async fn tail_events(
    events: Api<PodEvent>,
    uid: String,
    config: WatchConfig,
    cancel: CancellationToken,
) -> Result<(), WatchError> {
    let watcher = Watcher::new(
        events,
        Selector::fields(format!("involvedObject.uid={}", uid)),
        config,
    );

    let (past, version) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        listed = watcher.list() => listed?,
    };
    past.iter().for_each(log_event);

    let mut watch = watcher.watch_from(version);
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = watch.next() => event?,
        };
        match event {
            Event::Added(e) | Event::Modified(e) => log_event(&e),
            Event::Deleted(_) => {}
        }
    }
}

fn log_event(event: &PodEvent) {
    let reason = event.reason.as_deref().unwrap_or_default();
    let message = event.message.as_deref().unwrap_or_default();
    let count = event.count.unwrap_or(1);

    if event.type_.as_deref() == Some("Warning") {
        tracing::warn!(source = "events", reason, count, "{}", message);
    } else {
        tracing::info!(source = "events", reason, count, "{}", message);
    }
}
