//! `APISet` custom resource, `kube-cgi.aic.cs.nycu.edu.tw/v1alpha1`.
//!
//! The daemon only reads these objects; reconciling them into a
//! Deployment/Service/Ingress is the controller's job.

use k8s_openapi::api::core::v1::{PodSpec, SecretKeySelector};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "kube-cgi.aic.cs.nycu.edu.tw";

/// Desired state of an APISet.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kube-cgi.aic.cs.nycu.edu.tw",
    version = "v1alpha1",
    kind = "APISet",
    namespaced,
    status = "APISetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct APISetSpec {
    /// Domain name the APIs are served on.
    pub host: String,

    /// The APIs to host under `host`.
    pub apis: Vec<ApiDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<HistoryLimit>,
}

/// One HTTP path bound to a pod template.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiDefinition {
    /// Path of the endpoint. `/readyz` is reserved.
    pub path: String,

    /// Exactly one container is expected, with `restartPolicy: Never`. If the
    /// container sets `stdin`, it should also set `stdinOnce`.
    pub pod_spec: PodSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSpec>,
}

impl ApiDefinition {
    /// Content type for responses that do not declare one.
    pub fn content_type(&self) -> &str {
        self.response
            .as_ref()
            .and_then(|r| r.content_type.as_deref())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    pub fn schema(&self) -> Option<&serde_json::Value> {
        self.request.as_ref().and_then(|r| r.schema.as_ref())
    }

    pub fn pre_shared_key_ref(&self) -> Option<&SecretKeySelector> {
        self.request
            .as_ref()
            .and_then(|r| r.authentication.as_ref())
            .and_then(|a| a.pre_shared.as_ref())
            .and_then(|p| p.secret_key_ref.as_ref())
    }
}

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    /// JSON Schema the request body must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub schema: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Authentication>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_shared: Option<PreShared>,
}

/// Bearer token authentication against a token stored in a Secret.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreShared {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeySelector>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Retention of terminated pods, per phase.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLimit {
    #[serde(default)]
    pub succeeded: HistoryLimitSpec,

    #[serde(default)]
    pub failed: HistoryLimitSpec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLimitSpec {
    /// Retain at most this many pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,

    /// Keep pods created for older generations of the APISet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_previous_generations: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct APISetStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

fn preserve_unknown_fields(
    _: &mut schemars::gen::SchemaGenerator,
) -> schemars::schema::Schema {
    schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        extensions: [(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    }
    .into()
}
