//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by handler, status code
//! - `http_requests_duration_seconds` (histogram): latency by handler, code
//! - `http_inflight_requests` (gauge): requests in progress per handler
//! - `kcgid_pods_dispatched_total` (counter): pods created per handler
//! - `kcgid_gc_deletions_total` (counter): pods collected per policy, phase
//!
//! # Design Decisions
//! - The recorder is owned by [`Metrics`] and entered with
//!   `metrics::with_local_recorder`, so tests can build as many as they like
//! - Histogram buckets sized for pod round trips, not in-process latency

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};

const DURATION_METRIC: &str = "http_requests_duration_seconds";
const DURATION_BUCKETS: [f64; 10] = [0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Process-wide metrics registry.
#[derive(Clone)]
pub struct Metrics {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl Metrics {
    pub fn new() -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), &DURATION_BUCKETS)?
            .build_recorder();
        let handle = recorder.handle();

        let metrics = Self {
            recorder: Arc::new(recorder),
            handle,
        };
        metrics.with(|| {
            metrics::describe_counter!("http_requests_total", "Total HTTP requests");
            metrics::describe_histogram!(DURATION_METRIC, "HTTP request duration in seconds");
            metrics::describe_gauge!("http_inflight_requests", "HTTP requests in progress");
            metrics::describe_counter!("kcgid_pods_dispatched_total", "Pods created for requests");
            metrics::describe_counter!("kcgid_gc_deletions_total", "Pods deleted by the collector");
        });
        Ok(metrics)
    }

    fn with<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(self.recorder.as_ref(), f)
    }

    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn request_started(&self, handler: &str) {
        self.with(|| {
            metrics::gauge!("http_inflight_requests", "handler" => handler.to_string())
                .increment(1.0)
        });
    }

    pub fn request_finished(&self, handler: &str, code: u16, elapsed: Duration) {
        self.with(|| {
            metrics::gauge!("http_inflight_requests", "handler" => handler.to_string())
                .decrement(1.0);
            metrics::counter!("http_requests_total",
                "handler" => handler.to_string(),
                "code" => code.to_string()
            )
            .increment(1);
            metrics::histogram!(DURATION_METRIC,
                "handler" => handler.to_string(),
                "code" => code.to_string()
            )
            .record(elapsed.as_secs_f64());
        });
    }

    pub fn pod_dispatched(&self, handler: &str) {
        self.with(|| {
            metrics::counter!("kcgid_pods_dispatched_total", "handler" => handler.to_string())
                .increment(1)
        });
    }

    pub fn gc_deleted(&self, policy: &'static str, phase: &str) {
        self.with(|| {
            metrics::counter!("kcgid_gc_deletions_total",
                "policy" => policy,
                "phase" => phase.to_string()
            )
            .increment(1)
        });
    }
}
