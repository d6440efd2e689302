//! A scripted stand-in for the Kubernetes API server.
//!
//! Serves the handful of core/v1 calls the daemon makes: list, watch,
//! create, patch, delete and logs. Every request is recorded so tests can
//! assert on what was sent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::{Client, Config};
use kube_cgi::kubernetes::labels::GENERATION_KEY;
use serde_json::{json, Value};

/// One request as the server received it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    /// Resource collection, e.g. `pods` or `events`.
    pub resource: String,
    pub name: Option<String>,
    pub subresource: Option<String>,
    pub query: String,
    pub body: String,
}

impl Recorded {
    pub fn is_watch(&self) -> bool {
        self.method == Method::GET && self.query.contains("watch=true")
    }
}

#[derive(Default)]
pub struct ApiServer {
    requests: Mutex<Vec<Recorded>>,
    lists: Mutex<HashMap<String, (Vec<Value>, String)>>,
    watches: Mutex<HashMap<String, VecDeque<Vec<Value>>>>,
    logs: Mutex<String>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl ApiServer {
    /// Start serving on an ephemeral port; returns a client pointed at it.
    pub async fn start() -> (Arc<Self>, Client) {
        let server = Arc::new(Self::default());
        let app = Router::new().fallback(handle).with_state(server.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let url: Uri = format!("http://{}", addr).parse().unwrap();
        let client = Client::try_from(Config::new(url)).unwrap();
        (server, client)
    }

    /// Items returned when `resource` is listed.
    pub fn set_list(&self, resource: &str, items: Vec<Value>, resource_version: &str) {
        self.lists
            .lock()
            .unwrap()
            .insert(resource.to_string(), (items, resource_version.to_string()));
    }

    /// Queue one watch connection on `resource`: the events are sent, then
    /// the server closes the stream. Once the queue is empty, watches stay
    /// open without sending anything.
    pub fn push_watch(&self, resource: &str, events: Vec<Value>) {
        self.watches
            .lock()
            .unwrap()
            .entry(resource.to_string())
            .or_default()
            .push_back(events);
    }

    /// Output of every container log request.
    pub fn set_logs(&self, text: &str) {
        *self.logs.lock().unwrap() = text.to_string();
    }

    /// Make deleting pod `name` fail with a 500.
    pub fn fail_delete(&self, name: &str) {
        self.failing_deletes.lock().unwrap().insert(name.to_string());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn matching(&self, method: &Method, resource: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| &r.method == method && r.resource == resource)
            .collect()
    }

    /// Names of deleted pods, in request order.
    pub fn deleted(&self) -> Vec<String> {
        self.matching(&Method::DELETE, "pods")
            .into_iter()
            .filter_map(|r| r.name)
            .collect()
    }

    /// Poll until `done` holds on the recorded requests, for up to 5s.
    pub async fn eventually<F>(&self, done: F) -> bool
    where
        F: Fn(&[Recorded]) -> bool,
    {
        for _ in 0..250 {
            if done(&self.requests()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

/// A watch event line.
pub fn event(kind: &str, object: Value) -> Value {
    json!({ "type": kind, "object": object })
}

/// The error event an API server sends for an expired resource version.
pub fn expired() -> Value {
    event(
        "ERROR",
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "too old resource version",
            "reason": "Expired",
            "code": 410
        }),
    )
}

fn status(code: StatusCode, reason: &str) -> Response {
    let body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": reason,
        "reason": reason,
        "code": code.as_u16()
    });
    (code, Json(body)).into_response()
}

fn stub_pod(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "resourceVersion": "1" }
    })
}

async fn handle(
    State(server): State<Arc<ApiServer>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    // /api/v1/namespaces/{ns}/{resource}[/{name}[/{subresource}]]
    let segments: Vec<&str> = uri.path().trim_matches('/').split('/').collect();
    let Some(resource) = segments.get(4) else {
        return status(StatusCode::NOT_FOUND, "NotFound");
    };
    let recorded = Recorded {
        method: method.clone(),
        resource: resource.to_string(),
        name: segments.get(5).map(|s| s.to_string()),
        subresource: segments.get(6).map(|s| s.to_string()),
        query: uri.query().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    server.requests.lock().unwrap().push(recorded.clone());

    match (method.as_str(), recorded.name.as_deref(), recorded.subresource.as_deref()) {
        ("GET", None, None) if recorded.is_watch() => watch(&server, resource),
        ("GET", None, None) => list(&server, resource),
        ("POST", None, None) => create(&body),
        ("PATCH", Some(name), None) => Json(stub_pod(name)).into_response(),
        ("DELETE", Some(name), None) => {
            if server.failing_deletes.lock().unwrap().contains(name) {
                status(StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            } else {
                Json(stub_pod(name)).into_response()
            }
        }
        ("GET", Some(_), Some("log")) => server.logs.lock().unwrap().clone().into_response(),
        _ => status(StatusCode::NOT_FOUND, "NotFound"),
    }
}

fn list(server: &ApiServer, resource: &str) -> Response {
    let (items, version) = server
        .lists
        .lock()
        .unwrap()
        .get(resource)
        .cloned()
        .unwrap_or_else(|| (Vec::new(), "1".to_string()));
    Json(json!({
        "apiVersion": "v1",
        "kind": "List",
        "metadata": { "resourceVersion": version },
        "items": items
    }))
    .into_response()
}

fn watch(server: &ApiServer, resource: &str) -> Response {
    let scripted = server
        .watches
        .lock()
        .unwrap()
        .get_mut(resource)
        .and_then(VecDeque::pop_front);

    let lines: BoxStream<'static, Result<Bytes, Infallible>> = match scripted {
        Some(events) => stream::iter(
            events
                .into_iter()
                .map(|e| Ok(Bytes::from(format!("{}\n", e)))),
        )
        .boxed(),
        None => stream::pending().boxed(),
    };
    Response::new(Body::from_stream(lines))
}

fn create(body: &[u8]) -> Response {
    let Ok(mut pod) = serde_json::from_slice::<Value>(body) else {
        return status(StatusCode::BAD_REQUEST, "BadRequest");
    };
    let name = pod["metadata"]["name"].as_str().unwrap_or("pod").to_string();
    pod["metadata"]["uid"] = json!(format!("uid-{}", name));
    pod["metadata"]["resourceVersion"] = json!("100");
    pod["status"] = json!({ "phase": "Pending" });
    (StatusCode::CREATED, Json(pod)).into_response()
}

/// A pod as the API server would report it.
pub fn pod(name: &str, resource_version: &str, phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            resource_version: Some(resource_version.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

/// `pod` with its script container terminated `minute` minutes past noon.
pub fn terminated(mut pod: Pod, exit_code: i32, minute: i64) -> Pod {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minute);
    if let Some(status) = pod.status.as_mut() {
        status.container_statuses = Some(vec![ContainerStatus {
            name: "script".to_string(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    finished_at: Some(Time(at)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
    }
    pod
}

/// `pod` labelled with an APISet generation.
pub fn of_generation(mut pod: Pod, generation: i64) -> Pod {
    pod.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(GENERATION_KEY.to_string(), generation.to_string());
    pod
}

pub fn to_json(pod: &Pod) -> Value {
    serde_json::to_value(pod).unwrap()
}
