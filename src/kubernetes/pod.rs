//! Dispatch pod construction and status inspection.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::StatusCode;
use k8s_openapi::api::core::v1::{EnvVar, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use crate::cgi::{escape_expansion, too_large, BODY_ENV_KEY};
use crate::kubernetes::dispatch::Endpoint;
use crate::kubernetes::labels::{
    namify, APISET_KEY, GENERATION_KEY, MANAGED_BY_KEY, MANAGER, PATH_KEY,
};

/// Pod phase as reported in `status.phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Phase {
    pub fn of(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") | None => Phase::Pending,
            Some("Running") => Phase::Running,
            Some("Succeeded") => Phase::Succeeded,
            Some("Failed") => Phase::Failed,
            Some(_) => Phase::Unknown,
        }
    }

    /// Succeeded or Failed; the pod will not change phase again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit code of the script container, once it has terminated.
pub fn exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .first()?
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|t| t.exit_code)
}

/// When the script container terminated.
pub fn finished_at(pod: &Pod) -> Option<&Time> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .first()?
        .state
        .as_ref()?
        .terminated
        .as_ref()?
        .finished_at
        .as_ref()
}

/// APISet generation the pod was dispatched for.
pub fn generation_of(pod: &Pod) -> Option<i64> {
    pod.metadata
        .labels
        .as_ref()?
        .get(GENERATION_KEY)?
        .parse()
        .ok()
}

/// Why a request cannot be turned into a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A CGI variable does not fit in one environment entry.
    HeaderFieldsTooLarge,
    /// The body fits nowhere: not in env, and the script takes no stdin.
    PayloadTooLarge,
}

impl Rejection {
    pub fn status(self) -> StatusCode {
        match self {
            Rejection::HeaderFieldsTooLarge => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Rejection::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// A pod ready to be created.
#[derive(Debug, Clone)]
pub struct PodPlan {
    pub pod: Pod,
    /// The drained body was delivered as `REQUEST_BODY`.
    pub body_in_env: bool,
}

/// Pod name for request `id` on `path`.
pub fn pod_name(path: &str, id: &str) -> String {
    format!("{}-{}", namify(path), id)
}

/// Build the pod serving request `id` from the endpoint's template.
pub fn build_pod(
    endpoint: &Endpoint,
    id: &str,
    vars: &BTreeMap<String, String>,
    body: Option<&[u8]>,
) -> Result<PodPlan, Rejection> {
    let mut spec = endpoint.api.pod_spec.clone();
    let accepts_stdin = endpoint.accepts_stdin();
    let mut body_in_env = false;

    if let Some(container) = spec.containers.first_mut() {
        let env = container.env.get_or_insert_with(Vec::new);

        for (key, value) in vars {
            if too_large(key, value) {
                return Err(Rejection::HeaderFieldsTooLarge);
            }
            env.push(EnvVar {
                name: key.clone(),
                value: Some(escape_expansion(value)),
                ..Default::default()
            });
        }

        match body.map(std::str::from_utf8) {
            Some(Ok(text)) if !too_large(BODY_ENV_KEY, text) => {
                env.push(EnvVar {
                    name: BODY_ENV_KEY.to_string(),
                    value: Some(escape_expansion(text)),
                    ..Default::default()
                });
                body_in_env = true;
            }
            _ if !accepts_stdin => {
                tracing::info!("request body not deliverable via env and script does not accept stdin, rejecting request");
                return Err(Rejection::PayloadTooLarge);
            }
            _ => {
                tracing::info!("request body not deliverable via env, relying on stdin only");
            }
        }
    }

    let path = namify(&endpoint.api.path);
    let labels = BTreeMap::from([
        (MANAGED_BY_KEY.to_string(), MANAGER.to_string()),
        (GENERATION_KEY.to_string(), endpoint.generation.to_string()),
        (PATH_KEY.to_string(), path),
        (APISET_KEY.to_string(), endpoint.apiset.clone()),
    ]);

    let pod = Pod {
        metadata: ObjectMeta {
            name: Some(pod_name(&endpoint.api.path, id)),
            namespace: Some(endpoint.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![endpoint.owner.clone()]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    };

    Ok(PodPlan { pod, body_in_env })
}
