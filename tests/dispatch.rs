//! Request dispatch end to end, against a scripted API server.

mod common;

use std::net::SocketAddr;

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use common::apiserver::{event, pod, terminated, to_json, ApiServer};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube_cgi::api::ApiDefinition;
use kube_cgi::cgi::exit_code_status;
use kube_cgi::config::WatchConfig;
use kube_cgi::http::server::{HttpServer, ServedApi};
use kube_cgi::kubernetes::dispatch::{Dispatcher, Endpoint};
use kube_cgi::kubernetes::labels::RELEASED_KEY;
use kube_cgi::observability::Metrics;
use tower::ServiceExt;

fn endpoint() -> Endpoint {
    Endpoint {
        api: ApiDefinition {
            path: "/echo".to_string(),
            pod_spec: PodSpec {
                containers: vec![Container {
                    name: "script".to_string(),
                    image: Some("busybox".to_string()),
                    ..Default::default()
                }],
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            },
            request: None,
            response: None,
        },
        namespace: "cgi".to_string(),
        apiset: "demo".to_string(),
        generation: 3,
        owner: OwnerReference {
            api_version: "kube-cgi.aic.cs.nycu.edu.tw/v1alpha1".to_string(),
            kind: "APISet".to_string(),
            name: "demo".to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        },
    }
}

fn app(client: kube::Client) -> Router {
    let metrics = Metrics::new().unwrap();
    let watch = WatchConfig {
        base_delay_ms: 1,
        max_delay_ms: 10,
        max_reconnect_attempts: 3,
    };
    let dispatcher = Dispatcher::new(client.clone(), "cgi", watch, metrics.clone());
    let api = ServedApi {
        endpoint: endpoint(),
        validator: None,
        token: None,
    };
    HttpServer::new(vec![api], dispatcher, client, metrics, None).router()
}

fn get(uri: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("host", "demo.example.com")
        .body(Body::empty())
        .unwrap();
    let remote: SocketAddr = "10.0.0.7:41234".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(remote));
    request
}

async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_succeeded_pod_output_is_streamed_then_released() {
    let (server, client) = ApiServer::start().await;
    let done = terminated(pod("echo", "102", "Succeeded"), 0, 1);
    server.push_watch("pods", vec![event("MODIFIED", to_json(&done))]);
    server.set_logs("Content-Type: text/plain\nX-Script: yes\n\nhello");

    let response = app(client).oneshot(get("/echo?q=1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.headers()["x-script"], "yes");
    let id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(id.len(), 5);
    assert_eq!(body_string(response).await, "hello");

    let created = server.matching(&Method::POST, "pods");
    assert_eq!(created.len(), 1);
    assert!(created[0].body.contains(&format!("echo-{}", id)));

    let pod_watches: Vec<_> = server
        .requests()
        .into_iter()
        .filter(|r| r.is_watch() && r.resource == "pods")
        .collect();
    assert!(
        pod_watches[0].query.contains("resourceVersion=100"),
        "watch must resume from the creation version: {}",
        pod_watches[0].query
    );

    let logs: Vec<_> = server
        .requests()
        .into_iter()
        .filter(|r| r.subresource.as_deref() == Some("log"))
        .collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].query.contains("follow=true"));
    assert!(logs[0].query.contains("container=script"));

    assert!(
        server
            .eventually(|reqs| reqs.iter().any(|r| r.method == Method::PATCH))
            .await,
        "pod was not released after the body was dropped"
    );
    let patch = &server.matching(&Method::PATCH, "pods")[0];
    assert_eq!(patch.name.as_deref(), Some(format!("echo-{}", id).as_str()));
    assert!(patch.body.contains(RELEASED_KEY));
    assert!(patch.body.contains("\"true\""));
}

#[tokio::test]
async fn test_release_waits_for_the_body() {
    let (server, client) = ApiServer::start().await;
    let done = terminated(pod("echo", "102", "Succeeded"), 0, 1);
    server.push_watch("pods", vec![event("MODIFIED", to_json(&done))]);
    server.set_logs("Content-Type: text/plain\n\nhello");

    let response = app(client).oneshot(get("/echo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(server.matching(&Method::PATCH, "pods").is_empty());

    drop(response);
    assert!(
        server
            .eventually(|reqs| reqs.iter().any(|r| r.method == Method::PATCH))
            .await
    );
}

#[tokio::test]
async fn test_failed_pod_status_follows_exit_code() {
    let (server, client) = ApiServer::start().await;
    let failed = terminated(pod("echo", "102", "Failed"), 1, 1);
    server.push_watch("pods", vec![event("MODIFIED", to_json(&failed))]);
    server.set_logs("Content-Type: text/plain\n\nbad input");

    let response = app(client).oneshot(get("/echo")).await.unwrap();

    assert_eq!(response.status(), exit_code_status(1));
    assert_eq!(body_string(response).await, "bad input");
}

#[tokio::test]
async fn test_pod_deleted_while_waiting_is_server_error() {
    let (server, client) = ApiServer::start().await;
    let running = pod("echo", "101", "Running");
    server.push_watch(
        "pods",
        vec![
            event("MODIFIED", to_json(&running)),
            event("DELETED", to_json(&pod("echo", "102", "Running"))),
        ],
    );

    let response = app(client).oneshot(get("/echo")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_string(response).await, r#"{"error":"internal server error"}"#);
    assert!(server
        .requests()
        .iter()
        .all(|r| r.subresource.as_deref() != Some("log")));
}
