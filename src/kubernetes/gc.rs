//! Garbage collection of finished dispatch pods.
//!
//! # Data Flow
//! ```text
//! startup
//!     → collect_superseded (once): terminal pods of older generations
//!     → run_retention (per phase, forever):
//!           list released terminal pods → delete all but newest n
//!           → seed ring with survivors
//!           → watch arrivals → push into ring → delete what it evicts
//!           → on watch failure: back off, list again
//! ```
//!
//! # Design Decisions
//! - Decisions are pure functions over pods; only the loops talk to the API
//! - Only pods marked released are candidates, so output that is still
//!   being streamed is never collected
//! - Non-terminal pods are never deleted, whatever their generation
//! - Eviction order across replicas is only approximately consistent: each
//!   replica orders by the termination times it observes

use std::collections::HashSet;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, ResourceExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::api::{HistoryLimit, HistoryLimitSpec};
use crate::config::WatchConfig;
use crate::kubernetes::delete_pod;
use crate::kubernetes::labels::{
    selector, APISET_KEY, GENERATION_KEY, MANAGED_BY_KEY, MANAGER, RELEASED_KEY,
};
use crate::kubernetes::pod::{finished_at, generation_of, Phase};
use crate::kubernetes::ring::RetentionRing;
use crate::kubernetes::watch::{Event, Selector, WatchError, Watcher};
use crate::observability::tracing::gc_span;
use crate::observability::Metrics;
use crate::resilience::backoff::calculate_backoff;

const DEFAULT_SUCCEEDED_MAX: u32 = 0;
const DEFAULT_FAILED_MAX: u32 = 5;

#[derive(Debug, Error)]
pub enum GcError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("delete failed: {0}")]
    Delete(#[from] kube::Error),

    #[error("{failed} of {total} pods could not be deleted")]
    Incomplete { failed: usize, total: usize },
}

/// Retention rules for one terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcPolicy {
    pub phase: Phase,
    pub max_count: usize,
    pub keep_previous_generations: bool,
}

impl GcPolicy {
    fn from_spec(phase: Phase, default_max: u32, spec: Option<&HistoryLimitSpec>) -> Self {
        Self {
            phase,
            max_count: spec.and_then(|s| s.max_count).unwrap_or(default_max) as usize,
            keep_previous_generations: spec
                .and_then(|s| s.keep_previous_generations)
                .unwrap_or(false),
        }
    }

    /// Policies for Succeeded and Failed pods, defaults filled in.
    pub fn from_history_limit(limit: Option<&HistoryLimit>) -> [GcPolicy; 2] {
        [
            Self::from_spec(
                Phase::Succeeded,
                DEFAULT_SUCCEEDED_MAX,
                limit.map(|l| &l.succeeded),
            ),
            Self::from_spec(Phase::Failed, DEFAULT_FAILED_MAX, limit.map(|l| &l.failed)),
        ]
    }
}

/// What superseded-generation cleanup does with one pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Collect,
    Keep,
    /// Old generation, still running: logged, never killed.
    LeaveRunning,
}

pub fn superseded_verdict(pod: &Pod, generation: i64, policies: &[GcPolicy]) -> Verdict {
    match generation_of(pod) {
        Some(g) if g < generation => {}
        _ => return Verdict::Keep,
    }

    let phase = Phase::of(pod);
    if !phase.is_terminal() {
        return Verdict::LeaveRunning;
    }
    match policies.iter().find(|p| p.phase == phase) {
        Some(policy) if policy.keep_previous_generations => Verdict::Keep,
        _ => Verdict::Collect,
    }
}

/// In-memory view of the retained pods for one phase.
#[derive(Debug)]
pub struct Retention {
    ring: RetentionRing<String>,
    seen: HashSet<String>,
}

impl Retention {
    pub fn new(max_count: usize) -> Self {
        Self {
            ring: RetentionRing::new(max_count),
            seen: HashSet::new(),
        }
    }

    /// Rebuild from a full list; returns the pods to delete, oldest first.
    pub fn seed(&mut self, mut pods: Vec<Pod>) -> Vec<String> {
        self.ring.clear();
        self.seen.clear();

        pods.sort_by_key(|p| finished_at(p).map(|t| t.0));
        let excess = pods.len().saturating_sub(self.ring.capacity());

        let mut doomed = Vec::with_capacity(excess);
        for (i, pod) in pods.into_iter().enumerate() {
            let name = pod.name_any();
            if i < excess {
                doomed.push(name);
            } else {
                self.seen.insert(name.clone());
                self.ring.push(name);
            }
        }
        doomed
    }

    /// Apply one watch event; returns the pod it displaces, if any.
    ///
    /// Only additions count as arrivals. Updates to a pod already evicted,
    /// or to one being deleted, must not displace a retained pod.
    pub fn observe(&mut self, event: &Event<Pod>) -> Option<String> {
        match event {
            Event::Added(pod) if pod.metadata.deletion_timestamp.is_none() => self.arrive(pod),
            _ => None,
        }
    }

    /// Record a newly finished pod; returns the pod it displaces, if any.
    pub fn arrive(&mut self, pod: &Pod) -> Option<String> {
        let name = pod.name_any();
        if !self.seen.insert(name.clone()) {
            return None;
        }
        let evicted = self.ring.push(name)?;
        self.seen.remove(&evicted);
        Some(evicted)
    }

    /// Retained pod names, oldest first.
    pub fn retained(&self) -> Vec<&str> {
        self.ring.iter().map(String::as_str).collect()
    }
}

/// Runs the collection policies for one APISet generation.
#[derive(Clone)]
pub struct Collector {
    pods: Api<Pod>,
    apiset: String,
    generation: i64,
    watch: WatchConfig,
    metrics: Metrics,
}

impl Collector {
    pub fn new(
        pods: Api<Pod>,
        apiset: impl Into<String>,
        generation: i64,
        watch: WatchConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            pods,
            apiset: apiset.into(),
            generation,
            watch,
            metrics,
        }
    }

    /// Delete terminal pods left over from older generations.
    ///
    /// A failed delete is logged and skipped; the rest are still attempted.
    pub async fn collect_superseded(&self, policies: &[GcPolicy]) -> Result<(), GcError> {
        let span = gc_span("superseded", "Terminal");
        async move {
            let labels = selector(&[(MANAGED_BY_KEY, MANAGER), (APISET_KEY, &self.apiset)]);
            let watcher = Watcher::new(
                self.pods.clone(),
                Selector::default().labels(labels),
                self.watch,
            );
            let (pods, _) = watcher.list().await?;

            let (mut total, mut failed) = (0, 0);
            for pod in pods {
                let name = pod.name_any();
                match superseded_verdict(&pod, self.generation, policies) {
                    Verdict::Keep => {}
                    Verdict::LeaveRunning => {
                        tracing::info!(pod = %name, phase = %Phase::of(&pod), "Leaving non-terminal pod of an older generation");
                    }
                    Verdict::Collect => {
                        total += 1;
                        match delete_pod(&self.pods, &name).await {
                            Ok(()) => {
                                self.metrics.gc_deleted("superseded", Phase::of(&pod).as_str());
                                tracing::debug!(pod = %name, "Collected superseded pod");
                            }
                            Err(e) => {
                                failed += 1;
                                tracing::warn!(pod = %name, error = %e, "Cannot delete superseded pod");
                            }
                        }
                    }
                }
            }

            if failed > 0 {
                return Err(GcError::Incomplete { failed, total });
            }
            tracing::info!(collected = total, "Superseded pods collected");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Enforce `policy.max_count` until cancelled.
    pub async fn run_retention(&self, policy: GcPolicy, cancel: CancellationToken) {
        let span = gc_span("retention", policy.phase.as_str());
        async move {
            let labels = selector(&[
                (MANAGED_BY_KEY, MANAGER),
                (GENERATION_KEY, &self.generation.to_string()),
                (APISET_KEY, &self.apiset),
                (RELEASED_KEY, "true"),
            ]);
            let watcher = Watcher::new(
                self.pods.clone(),
                Selector::fields(format!("status.phase={}", policy.phase)).labels(labels),
                self.watch,
            );
            let mut retention = Retention::new(policy.max_count);
            let mut failures: u32 = 0;

            loop {
                let result = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = self.retain(&watcher, &mut retention, &policy, &mut failures) => result,
                };
                let Err(e) = result else { return };

                failures += 1;
                tracing::warn!(error = %e, failures, "Retention loop failed, relisting");
                let delay = calculate_backoff(failures, self.watch.base_delay_ms, self.watch.max_delay_ms);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn retain(
        &self,
        watcher: &Watcher<Pod>,
        retention: &mut Retention,
        policy: &GcPolicy,
        failures: &mut u32,
    ) -> Result<(), GcError> {
        let (pods, version) = watcher.list().await?;
        for name in retention.seed(pods) {
            self.collect(&name, policy).await?;
        }
        *failures = 0;
        tracing::debug!(retained = ?retention.retained(), "Retention seeded");

        let mut watch = watcher.watch_from(version);
        loop {
            let event = watch.next().await?;
            if let Some(evicted) = retention.observe(&event) {
                self.collect(&evicted, policy).await?;
            }
        }
    }

    async fn collect(&self, name: &str, policy: &GcPolicy) -> Result<(), GcError> {
        delete_pod(&self.pods, name).await?;
        self.metrics.gc_deleted("retention", policy.phase.as_str());
        tracing::debug!(pod = %name, "Collected pod");
        Ok(())
    }
}
