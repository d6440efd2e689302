//! List-then-watch with transparent reconnects.
//!
//! # Responsibilities
//! - List a resource and report the list's resource version
//! - Resume a watch from any resource version, reconnecting when the server
//!   closes the stream or the connection drops
//! - Wait until a caller-supplied predicate holds, honouring cancellation
//!
//! # Design Decisions
//! - Watch payloads are decoded into [`Event`] once, here, so consumers match
//!   on a typed object instead of inspecting raw watch events
//! - Bookmarks only advance the resume point and are never surfaced
//! - An expired resource version (410 Gone) is reported, not papered over:
//!   callers decide whether to re-list

use std::fmt::Debug;

use futures_util::{stream::BoxStream, StreamExt};
use kube::{
    api::{ListParams, WatchEvent, WatchParams},
    Api, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::resilience::backoff::calculate_backoff;

/// A change to a watched object.
#[derive(Debug, Clone)]
pub enum Event<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl<K> Event<K> {
    pub fn object(&self) -> &K {
        match self {
            Event::Added(o) | Event::Modified(o) | Event::Deleted(o) => o,
        }
    }

    pub fn into_object(self) -> K {
        match self {
            Event::Added(o) | Event::Modified(o) | Event::Deleted(o) => o,
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),

    #[error("resource version {0} expired")]
    Expired(String),

    #[error("watch cancelled")]
    Cancelled,

    #[error("watch gave up after {0} consecutive failures")]
    Exhausted(u32),
}

/// Label and field selectors scoping a list/watch.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub labels: Option<String>,
    pub fields: Option<String>,
}

impl Selector {
    pub fn fields(fields: impl Into<String>) -> Self {
        Self {
            labels: None,
            fields: Some(fields.into()),
        }
    }

    pub fn labels(mut self, labels: impl Into<String>) -> Self {
        self.labels = Some(labels.into());
        self
    }

    fn list_params(&self) -> ListParams {
        let mut params = ListParams::default();
        if let Some(labels) = &self.labels {
            params = params.labels(labels);
        }
        if let Some(fields) = &self.fields {
            params = params.fields(fields);
        }
        params
    }

    fn watch_params(&self) -> WatchParams {
        let mut params = WatchParams::default();
        if let Some(labels) = &self.labels {
            params = params.labels(labels);
        }
        if let Some(fields) = &self.fields {
            params = params.fields(fields);
        }
        params
    }
}

/// Lists and watches one kind of object under a fixed selector.
#[derive(Clone)]
pub struct Watcher<K> {
    api: Api<K>,
    selector: Selector,
    config: WatchConfig,
}

impl<K> Watcher<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    pub fn new(api: Api<K>, selector: Selector, config: WatchConfig) -> Self {
        Self {
            api,
            selector,
            config,
        }
    }

    /// Current objects and the resource version to resume watching from.
    pub async fn list(&self) -> Result<(Vec<K>, String), WatchError> {
        let list = self.api.list(&self.selector.list_params()).await?;
        let version = list.metadata.resource_version.unwrap_or_default();
        Ok((list.items, version))
    }

    /// Events strictly after `resource_version`.
    pub fn watch_from(&self, resource_version: String) -> RetryWatch<K> {
        RetryWatch {
            api: self.api.clone(),
            params: self.selector.watch_params(),
            resource_version,
            stream: None,
            config: self.config,
            failures: 0,
        }
    }

    /// Watch from `resource_version` until `done` accepts an event.
    ///
    /// Returns the accepting event.
    pub async fn until<F>(
        &self,
        resource_version: String,
        cancel: &CancellationToken,
        mut done: F,
    ) -> Result<Event<K>, WatchError>
    where
        F: FnMut(&Event<K>) -> bool,
    {
        let mut watch = self.watch_from(resource_version);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(WatchError::Cancelled),
                event = watch.next() => event?,
            };
            if done(&event) {
                return Ok(event);
            }
        }
    }
}

/// A watch that resumes from the last seen resource version.
pub struct RetryWatch<K> {
    api: Api<K>,
    params: WatchParams,
    resource_version: String,
    stream: Option<BoxStream<'static, kube::Result<WatchEvent<K>>>>,
    config: WatchConfig,
    failures: u32,
}

impl<K> RetryWatch<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }

    /// Next change, reconnecting as needed.
    pub async fn next(&mut self) -> Result<Event<K>, WatchError> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                self.connect().await?;
                continue;
            };

            match stream.next().await {
                None => {
                    tracing::debug!(
                        resource_version = %self.resource_version,
                        "Watch closed by server, resuming"
                    );
                    self.stream = None;
                }
                Some(Ok(WatchEvent::Added(obj))) => return Ok(self.accept(Event::Added(obj))),
                Some(Ok(WatchEvent::Modified(obj))) => {
                    return Ok(self.accept(Event::Modified(obj)))
                }
                Some(Ok(WatchEvent::Deleted(obj))) => return Ok(self.accept(Event::Deleted(obj))),
                Some(Ok(WatchEvent::Bookmark(bookmark))) => {
                    self.resource_version = bookmark.metadata.resource_version;
                }
                Some(Ok(WatchEvent::Error(e))) if e.code == 410 => {
                    return Err(WatchError::Expired(self.resource_version.clone()));
                }
                Some(Ok(WatchEvent::Error(e))) => {
                    tracing::warn!(code = e.code, message = %e.message, "Watch error event");
                    self.stream = None;
                    self.backoff().await?;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Watch stream failed");
                    self.stream = None;
                    self.backoff().await?;
                }
            }
        }
    }

    fn accept(&mut self, event: Event<K>) -> Event<K> {
        if let Some(version) = event.object().resource_version() {
            self.resource_version = version;
        }
        self.failures = 0;
        event
    }

    async fn connect(&mut self) -> Result<(), WatchError> {
        loop {
            match self.api.watch(&self.params, &self.resource_version).await {
                Ok(stream) => {
                    self.stream = Some(stream.boxed());
                    return Ok(());
                }
                Err(kube::Error::Api(e)) if e.code == 410 => {
                    return Err(WatchError::Expired(self.resource_version.clone()));
                }
                Err(e) if is_transient(&e) => {
                    tracing::warn!(error = %e, "Cannot open watch, retrying");
                    self.backoff().await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn backoff(&mut self) -> Result<(), WatchError> {
        self.failures += 1;
        if self.failures > self.config.max_reconnect_attempts {
            return Err(WatchError::Exhausted(self.failures - 1));
        }
        let delay = calculate_backoff(
            self.failures,
            self.config.base_delay_ms,
            self.config.max_delay_ms,
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Errors worth retrying: overload, server faults, broken connections.
pub fn is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(e) => e.code == 429 || e.code >= 500,
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Whether `err` is the API server reporting 404.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_error_classification() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(409)));
        assert!(is_transient(&api_error(503)));
        assert!(is_transient(&api_error(429)));
        assert!(!is_transient(&api_error(403)));
    }

    #[test]
    fn test_event_accessors() {
        let event = Event::Deleted("pod-a".to_string());
        assert_eq!(event.object(), "pod-a");
        assert_eq!(event.into_object(), "pod-a");
    }

    #[test]
    fn test_selector_params() {
        let selector = Selector::fields("metadata.name=echo-abc12").labels("a=b");
        let list = selector.list_params();
        assert_eq!(list.field_selector.as_deref(), Some("metadata.name=echo-abc12"));
        assert_eq!(list.label_selector.as_deref(), Some("a=b"));
        let watch = selector.watch_params();
        assert_eq!(watch.field_selector.as_deref(), Some("metadata.name=echo-abc12"));
    }
}
