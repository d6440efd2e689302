//! Startup orchestration.
//!
//! # Responsibilities
//! - Fetch the APISet and check it is not older than expected
//! - Resolve every API into an endpoint: owner reference, token, schema
//! - Start the collectors, then bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Secrets and schemas are resolved once here, never per request
//! - Listeners start last (traffic only when ready)

use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, Secret, SecretKeySelector};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Api, Client, Resource, ResourceExt};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::api::APISet;
use crate::config::DaemonConfig;
use crate::http::middleware::compile_schema;
use crate::http::server::{run_metrics, HttpServer, ServedApi, READYZ_PATH};
use crate::kubernetes::dispatch::{Dispatcher, Endpoint};
use crate::kubernetes::gc::{Collector, GcPolicy};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::lifecycle::tasks::spawn_supervised;
use crate::observability::Metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot build kubernetes client: {0}")]
    Client(#[source] kube::Error),

    #[error("cannot fetch APISet {name}: {source}")]
    FetchApiSet {
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("APISet generation {found} is older than expected {expected}")]
    StaleGeneration { found: i64, expected: i64 },

    #[error("APISet has no uid to own pods with")]
    MissingOwner,

    #[error("api {path}: {reason}")]
    InvalidApi { path: String, reason: String },

    #[error("api {path}: cannot read token from secret {secret}: {reason}")]
    Token {
        path: String,
        secret: String,
        reason: String,
    },

    #[error("cannot build metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Turn the APISet's APIs into endpoints, checking what the pod builder
/// and router rely on.
pub fn resolve_endpoints(set: &APISet, expected_generation: i64) -> Result<Vec<Endpoint>, StartupError> {
    let generation = set.metadata.generation.unwrap_or_default();
    if generation < expected_generation {
        return Err(StartupError::StaleGeneration {
            found: generation,
            expected: expected_generation,
        });
    }

    let owner = owner_reference(set).ok_or(StartupError::MissingOwner)?;
    let namespace = set.namespace().unwrap_or_else(|| "default".to_string());
    let apiset = set.name_any();

    let mut seen = HashSet::new();
    let mut endpoints = Vec::with_capacity(set.spec.apis.len());
    for api in &set.spec.apis {
        let invalid = |reason: &str| StartupError::InvalidApi {
            path: api.path.clone(),
            reason: reason.to_string(),
        };
        if !api.path.starts_with('/') {
            return Err(invalid("path must start with /"));
        }
        if api.path == READYZ_PATH {
            return Err(invalid("path is reserved"));
        }
        if !seen.insert(api.path.as_str()) {
            return Err(invalid("path is defined twice"));
        }
        if api.pod_spec.containers.len() != 1 {
            return Err(invalid("pod spec must have exactly one container"));
        }

        endpoints.push(Endpoint {
            api: api.clone(),
            namespace: namespace.clone(),
            apiset: apiset.clone(),
            generation,
            owner: owner.clone(),
        });
    }
    Ok(endpoints)
}

/// A plain owner reference to `set`.
///
/// Neither `controller` nor `blockOwnerDeletion` is set, so creating pods
/// needs no rights on the APISet's finalizers.
fn owner_reference(set: &APISet) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: APISet::api_version(&()).into_owned(),
        kind: APISet::kind(&()).into_owned(),
        name: set.name_any(),
        uid: set.uid()?,
        ..Default::default()
    })
}

async fn read_token(
    secrets: &Api<Secret>,
    path: &str,
    selector: &SecretKeySelector,
) -> Result<String, StartupError> {
    let failed = |reason: String| StartupError::Token {
        path: path.to_string(),
        secret: selector.name.clone(),
        reason,
    };

    let secret = secrets
        .get(&selector.name)
        .await
        .map_err(|e| failed(e.to_string()))?;
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(&selector.key))
        .ok_or_else(|| failed(format!("no key {}", selector.key)))?;
    let token = String::from_utf8(bytes.0.clone()).map_err(|_| failed("token is not utf-8".to_string()))?;
    Ok(token.trim().to_string())
}

async fn serve_apis(
    client: &Client,
    endpoints: Vec<Endpoint>,
) -> Result<Vec<ServedApi>, StartupError> {
    let mut served = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        let path = endpoint.api.path.clone();

        let validator = match endpoint.api.schema() {
            Some(schema) => Some(compile_schema(schema).map_err(|reason| {
                StartupError::InvalidApi {
                    path: path.clone(),
                    reason: format!("invalid schema: {}", reason),
                }
            })?),
            None => None,
        };

        let token = match endpoint.api.pre_shared_key_ref() {
            Some(selector) => {
                let secrets: Api<Secret> = Api::namespaced(client.clone(), &endpoint.namespace);
                Some(read_token(&secrets, &path, selector).await?)
            }
            None => None,
        };

        served.push(ServedApi {
            endpoint,
            validator,
            token,
        });
    }
    Ok(served)
}

fn spawn_collectors(collector: Collector, policies: [GcPolicy; 2], shutdown: &Shutdown) {
    let superseded = collector.clone();
    spawn_supervised("gc-superseded", async move {
        superseded.collect_superseded(&policies).await
    });

    for policy in policies {
        let collector = collector.clone();
        let cancel = shutdown.subscribe();
        spawn_supervised("gc-retention", async move {
            collector.run_retention(policy, cancel).await;
            Ok::<(), Infallible>(())
        });
    }
}

/// Bring the daemon up and serve until a termination signal.
pub async fn run(config: DaemonConfig) -> Result<(), StartupError> {
    let metrics = Metrics::new()?;
    let client = Client::try_default().await.map_err(StartupError::Client)?;
    let shutdown = Shutdown::new();
    signals::install(shutdown.clone());

    let target = &config.apiset;
    let sets: Api<APISet> = Api::namespaced(client.clone(), &target.namespace);
    let set = sets
        .get(&target.name)
        .await
        .map_err(|source| StartupError::FetchApiSet {
            name: target.name.clone(),
            source,
        })?;
    let generation = set.metadata.generation.unwrap_or_default();
    tracing::info!(apiset = %target.name, generation, apis = set.spec.apis.len(), "APISet loaded");

    let endpoints = resolve_endpoints(&set, target.generation)?;
    let apis = serve_apis(&client, endpoints).await?;

    if config.gc.enabled {
        let pods: Api<Pod> = Api::namespaced(client.clone(), &target.namespace);
        let collector = Collector::new(pods, target.name.clone(), generation, config.watch, metrics.clone());
        let policies = GcPolicy::from_history_limit(set.spec.history_limit.as_ref());
        tracing::info!(?policies, "Starting garbage collection");
        spawn_collectors(collector, policies, &shutdown);
    }

    if config.observability.metrics_enabled {
        let address = config.observability.metrics_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;
        spawn_supervised(
            "metrics",
            run_metrics(listener, metrics.clone(), shutdown.clone()),
        );
    }

    let dispatcher = Dispatcher::new(client.clone(), &target.namespace, config.watch, metrics.clone());
    let timeout = (config.timeouts.request_secs > 0)
        .then(|| Duration::from_secs(config.timeouts.request_secs));
    let server = HttpServer::new(apis, dispatcher, client, metrics, timeout);

    let address = config.listener.bind_address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;
    server.run(listener, shutdown.clone()).await.map_err(StartupError::Serve)?;

    shutdown.trigger();
    Ok(())
}
