//! Everything that talks to the Kubernetes API.
//!
//! # Data Flow
//! ```text
//! HTTP handler
//!     → dispatch.rs (per-request state machine)
//!         → pod.rs (build pod from the API's template)
//!         → watch.rs (wait for Running / terminal phase)
//!         → events.rs (background: log pod events)
//!         → stdin.rs (background: attach and stream the body)
//!         → pod logs → cgi::read_response → HTTP response
//!
//! Startup
//!     → gc.rs (superseded cleanup once, retention loops forever)
//!         → watch.rs, ring.rs
//! ```
//!
//! # Design Decisions
//! - Pods are created and deleted, never updated, apart from the release
//!   label added once their output has been served
//! - Deleting something that is already gone is success

pub mod dispatch;
pub mod events;
pub mod gc;
pub mod labels;
pub mod pod;
pub mod ring;
pub mod stdin;
pub mod watch;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams};

/// Delete pod `name`; a pod that no longer exists counts as deleted.
pub async fn delete_pod(pods: &Api<Pod>, name: &str) -> Result<(), kube::Error> {
    match pods.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if watch::is_not_found(&e) => {
            tracing::debug!(pod = %name, "Pod already gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
