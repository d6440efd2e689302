//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for `kcgid`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The APISet this daemon serves.
    pub apiset: ApiSetRef,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Watch reconnect behaviour.
    pub watch: WatchConfig,

    /// Garbage collection of finished pods.
    pub gc: GcConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:1234").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:1234".to_string(),
        }
    }
}

/// Identifies the APISet object. Usually injected through the environment
/// by the controller that deploys the daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiSetRef {
    pub namespace: String,

    pub name: String,

    /// Lowest acceptable `metadata.generation`; an older object means the
    /// informer cache behind this deployment is stale.
    pub generation: i64,
}

impl Default for ApiSetRef {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name: String::new(),
            generation: 0,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a whole request, pod startup included. 0 disables it.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 0 }
    }
}

/// Reconnect policy for pod and event watches.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// First reconnect delay in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound on the reconnect delay.
    pub max_delay_ms: u64,

    /// Consecutive failures tolerated before a watch gives up.
    pub max_reconnect_attempts: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            max_reconnect_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GcConfig {
    /// Run the retention and superseded-generation collectors.
    pub enabled: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Log output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:5678".to_string(),
        }
    }
}
