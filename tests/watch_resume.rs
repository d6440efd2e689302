//! Watch resumption against a scripted API server.

mod common;

use common::apiserver::{event, expired, pod, to_json, ApiServer};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube_cgi::config::WatchConfig;
use kube_cgi::kubernetes::pod::Phase;
use kube_cgi::kubernetes::watch::{Event, Selector, WatchError, Watcher};
use tokio_util::sync::CancellationToken;

fn fast() -> WatchConfig {
    WatchConfig {
        base_delay_ms: 1,
        max_delay_ms: 10,
        max_reconnect_attempts: 3,
    }
}

fn watcher(client: kube::Client) -> Watcher<Pod> {
    Watcher::new(
        Api::namespaced(client, "cgi"),
        Selector::fields("metadata.name=echo-abc12"),
        fast(),
    )
}

#[tokio::test]
async fn test_until_resumes_from_last_seen_version() {
    let (server, client) = ApiServer::start().await;
    server.push_watch("pods", vec![event("MODIFIED", to_json(&pod("echo-abc12", "101", "Pending")))]);
    server.push_watch("pods", vec![event("MODIFIED", to_json(&pod("echo-abc12", "102", "Succeeded")))]);

    let found = watcher(client)
        .until("100".to_string(), &CancellationToken::new(), |e| {
            Phase::of(e.object()).is_terminal()
        })
        .await
        .unwrap();

    assert!(matches!(&found, Event::Modified(p) if Phase::of(p) == Phase::Succeeded));

    let watches: Vec<_> = server.requests().into_iter().filter(|r| r.is_watch()).collect();
    assert_eq!(watches.len(), 2, "server closed the first watch, expected one reconnect");
    assert!(watches[0].query.contains("resourceVersion=100"));
    assert!(watches[1].query.contains("resourceVersion=101"));
}

#[tokio::test]
async fn test_expired_version_is_reported() {
    let (server, client) = ApiServer::start().await;
    server.push_watch("pods", vec![expired()]);

    let err = watcher(client)
        .until("100".to_string(), &CancellationToken::new(), |_| true)
        .await
        .unwrap_err();

    assert!(matches!(err, WatchError::Expired(version) if version == "100"));
}

#[tokio::test]
async fn test_cancel_stops_an_idle_watch() {
    let (_server, client) = ApiServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = watcher(client)
        .until("100".to_string(), &cancel, |_| true)
        .await
        .unwrap_err();

    assert!(matches!(err, WatchError::Cancelled));
}
