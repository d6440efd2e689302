//! Per-request dispatch: one HTTP request, one pod.
//!
//! # Data Flow
//! ```text
//! Building   request → CGI variables → pod from template    (431 / 413)
//! Created    pod created; events tailed in the background
//! Running    [stdin accepted] attach and stream the body in the background
//! Terminal   Succeeded | Failed; follow logs → CGI translation → response
//! Released   response body dropped → pod labelled released, tasks cancelled
//! ```
//!
//! # Design Decisions
//! - Watches resume from the pod's creation resource version, so no phase
//!   transition between create and watch is missed
//! - A pod deleted underneath a request is an anomaly, reported distinctly
//! - The response body owns the release guard: releasing and cancelling
//!   background tasks happen when the client is done reading, whether it
//!   finished or went away
//! - Nothing here is retried; retries belong to the client

use std::net::SocketAddr;

use axum::{
    body::Body,
    http::{request::Parts, HeaderValue, StatusCode},
    response::Response,
};
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{Container, Event as PodEvent, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::{LogParams, Patch, PatchParams, PostParams},
    Api, Client, ResourceExt,
};
use thiserror::Error;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::api::ApiDefinition;
use crate::cgi::{exit_code_status, read_response, vars_from_request, CgiError, Translated};
use crate::config::WatchConfig;
use crate::http::request::{RequestContext, X_REQUEST_ID};
use crate::kubernetes::events::tail_events;
use crate::kubernetes::labels::{MANAGER, RELEASED_KEY};
use crate::kubernetes::pod::{build_pod, exit_code, Phase, Rejection};
use crate::kubernetes::stdin::{stream_stdin, StdinSource};
use crate::kubernetes::watch::{Event, Selector, WatchError, Watcher};
use crate::lifecycle::tasks::spawn_supervised;
use crate::observability::Metrics;

/// One API definition, resolved against the APISet serving it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub api: ApiDefinition,
    pub namespace: String,
    pub apiset: String,
    pub generation: i64,
    pub owner: OwnerReference,
}

impl Endpoint {
    /// The script container. Startup guarantees there is exactly one.
    pub fn container(&self) -> Option<&Container> {
        self.api.pod_spec.containers.first()
    }

    pub fn accepts_stdin(&self) -> bool {
        self.container().and_then(|c| c.stdin).unwrap_or(false)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request rejected: {:?}", .0)]
    Rejected(Rejection),

    #[error("cannot create pod: {0}")]
    Create(#[source] kube::Error),

    #[error("pod {0} was deleted before it finished")]
    PodDeleted(String),

    #[error("waiting for pod: {0}")]
    Watch(#[from] WatchError),

    #[error("cannot follow pod logs: {0}")]
    Logs(#[source] kube::Error),

    #[error("local redirect to {0} is not supported")]
    LocalRedirect(String),

    #[error("invalid script output: {source}")]
    Output {
        #[source]
        source: CgiError,
        status: StatusCode,
    },
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Rejected(rejection) => rejection.status(),
            DispatchError::LocalRedirect(_) => StatusCode::NOT_IMPLEMENTED,
            DispatchError::Output { status, .. } => *status,
            DispatchError::Create(_)
            | DispatchError::PodDeleted(_)
            | DispatchError::Watch(_)
            | DispatchError::Logs(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Rejection> for DispatchError {
    fn from(rejection: Rejection) -> Self {
        DispatchError::Rejected(rejection)
    }
}

/// Creates pods for requests and turns their output into responses.
#[derive(Clone)]
pub struct Dispatcher {
    pods: Api<Pod>,
    events: Api<PodEvent>,
    watch: WatchConfig,
    metrics: Metrics,
}

impl Dispatcher {
    pub fn new(client: Client, namespace: &str, watch: WatchConfig, metrics: Metrics) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            events: Api::namespaced(client, namespace),
            watch,
            metrics,
        }
    }

    /// Serve one request with a fresh pod.
    ///
    /// `live` is the unread request body when it was not drained into `ctx`.
    pub async fn dispatch(
        &self,
        endpoint: &Endpoint,
        ctx: &RequestContext,
        parts: &Parts,
        remote: SocketAddr,
        live: Option<Body>,
    ) -> Result<Response, DispatchError> {
        let drained = ctx.body.clone();

        // Building
        let vars = vars_from_request(parts, ctx.content_length, remote);
        let plan = build_pod(endpoint, &ctx.id, &vars, drained.as_deref())?;

        // Created
        let pod = self
            .pods
            .create(&PostParams::default(), &plan.pod)
            .await
            .map_err(DispatchError::Create)?;
        let name = pod.name_any();
        ctx.span.record("pod", name.as_str());
        self.metrics.pod_dispatched(&ctx.path);
        tracing::info!(body_in_env = plan.body_in_env, "Pod created");

        let guard = ReleaseGuard {
            pods: self.pods.clone(),
            name: name.clone(),
            cancel: ctx.cancel.clone(),
            span: ctx.span.clone(),
        };

        if let Some(uid) = pod.uid() {
            spawn_supervised(
                "events",
                tail_events(self.events.clone(), uid, self.watch, ctx.cancel.clone())
                    .instrument(ctx.span.clone()),
            );
        }

        let watcher = Watcher::new(
            self.pods.clone(),
            Selector::fields(format!("metadata.name={}", name)),
            self.watch,
        );
        let stdin = endpoint.accepts_stdin();
        let mut version = pod.resource_version().unwrap_or_default();

        // Running, when there is stdin to deliver
        let mut current = self
            .wait(&watcher, &name, version, &ctx.cancel, |phase| {
                phase.is_terminal() || (stdin && phase == Phase::Running)
            })
            .await?;
        let mut phase = Phase::of(&current);

        if stdin && phase == Phase::Running {
            let source = match (drained, live) {
                (Some(bytes), _) => StdinSource::Drained(bytes),
                (None, Some(body)) => StdinSource::Live(body),
                (None, None) => StdinSource::Drained(Default::default()),
            };
            let container = endpoint.container().map(|c| c.name.clone()).unwrap_or_default();
            let (pods, pod_name, cancel) = (self.pods.clone(), name.clone(), ctx.cancel.clone());
            spawn_supervised(
                "stdin",
                async move {
                    stream_stdin(pods, pod_name, container, source, cancel)
                        .await
                        .map(|_| ())
                }
                .instrument(ctx.span.clone()),
            );
        }

        // Terminal
        if !phase.is_terminal() {
            version = current.resource_version().unwrap_or_default();
            current = self
                .wait(&watcher, &name, version, &ctx.cancel, Phase::is_terminal)
                .await?;
            phase = Phase::of(&current);
        }
        tracing::info!(phase = %phase, exit_code = ?exit_code(&current), "Pod finished");

        let default_status = match phase {
            Phase::Failed => exit_code(&current)
                .map(exit_code_status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            _ => StatusCode::OK,
        };

        let params = LogParams {
            follow: true,
            container: endpoint.container().map(|c| c.name.clone()),
            ..Default::default()
        };
        let logs = self
            .pods
            .log_stream(&name, &params)
            .await
            .map_err(DispatchError::Logs)?;
        let logs = Box::pin(logs).compat();

        let translated = read_response(logs, default_status)
            .await
            .map_err(|source| DispatchError::Output {
                source,
                status: if phase == Phase::Failed {
                    default_status
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                },
            })?;

        let cgi = match translated {
            Translated::Response(cgi) => cgi.with_default_content_type(endpoint.api.content_type()),
            Translated::LocalRedirect(location) => {
                return Err(DispatchError::LocalRedirect(location))
            }
        };

        let stream = ReaderStream::new(cgi.body).map(move |chunk| {
            let _release_on_drop = &guard;
            chunk
        });
        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = cgi.status;
        *response.headers_mut() = cgi.headers;
        if let Ok(id) = HeaderValue::from_str(&ctx.id) {
            response.headers_mut().insert(X_REQUEST_ID, id);
        }
        Ok(response)
    }

    /// Watch pod `name` until its phase satisfies `done`.
    async fn wait<F>(
        &self,
        watcher: &Watcher<Pod>,
        name: &str,
        version: String,
        cancel: &CancellationToken,
        mut done: F,
    ) -> Result<Pod, DispatchError>
    where
        F: FnMut(Phase) -> bool,
    {
        let event = watcher
            .until(version, cancel, |event| match event {
                Event::Deleted(_) => true,
                other => done(Phase::of(other.object())),
            })
            .await?;

        match event {
            Event::Deleted(_) => Err(DispatchError::PodDeleted(name.to_string())),
            Event::Added(pod) | Event::Modified(pod) => Ok(pod),
        }
    }
}

/// Marks the pod released and stops the request's background tasks when
/// dropped.
struct ReleaseGuard {
    pods: Api<Pod>,
    name: String,
    cancel: CancellationToken,
    span: Span,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.cancel.cancel();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(pod = %self.name, "No runtime left to release pod");
            return;
        };
        let pods = self.pods.clone();
        let name = std::mem::take(&mut self.name);
        runtime.spawn(
            async move {
                match release(&pods, &name).await {
                    Ok(()) => tracing::debug!(pod = %name, "Pod released"),
                    Err(e) => tracing::warn!(pod = %name, error = %e, "Cannot release pod"),
                }
            }
            .instrument(self.span.clone()),
        );
    }
}

/// Label pod `name` as released so the collector may take it.
pub async fn release(pods: &Api<Pod>, name: &str) -> Result<(), kube::Error> {
    let patch = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "labels": { RELEASED_KEY: "true" }
        }
    });
    match pods
        .patch(name, &PatchParams::apply(MANAGER).force(), &Patch::Apply(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if crate::kubernetes::watch::is_not_found(&e) => Ok(()),
        Err(e) => Err(e),
    }
}
