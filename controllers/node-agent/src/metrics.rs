//! Prometheus metrics for the agent.
//!
//! The registry belongs to one agent instance rather than the process, so
//! tests can build as many agents as they like.

use crate::error::AgentError;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

const METRICS_PREFIX: &str = "podlet";

#[derive(Debug, Clone)]
pub struct AgentMetrics {
    registry: Registry,
    pod_syncs: IntCounterVec,
    containers_created: IntCounter,
    containers_killed: IntCounter,
    image_pull_failures: IntCounter,
    desired_pods: IntGauge,
    sync_pods_duration: Histogram,
}

impl AgentMetrics {
    pub fn new() -> Result<Self, AgentError> {
        let registry = Registry::new_custom(Some(METRICS_PREFIX.to_string()), None)?;

        let pod_syncs = IntCounterVec::new(
            Opts::new("pod_syncs_total", "Single-pod reconciliation passes grouped by result"),
            &["result"],
        )?;
        let containers_created = IntCounter::new("containers_created_total", "Containers created and started")?;
        let containers_killed = IntCounter::new("containers_killed_total", "Containers stopped and removed")?;
        let image_pull_failures = IntCounter::new("image_pull_failures_total", "Failed image pulls")?;
        let desired_pods = IntGauge::new("desired_pods", "Pods in the current desired set")?;
        let sync_pods_duration = Histogram::with_opts(HistogramOpts::new(
            "sync_pods_duration_seconds",
            "Duration of node-wide reconciliation passes",
        ))?;

        registry.register(Box::new(pod_syncs.clone()))?;
        registry.register(Box::new(containers_created.clone()))?;
        registry.register(Box::new(containers_killed.clone()))?;
        registry.register(Box::new(image_pull_failures.clone()))?;
        registry.register(Box::new(desired_pods.clone()))?;
        registry.register(Box::new(sync_pods_duration.clone()))?;

        Ok(Self {
            registry,
            pod_syncs,
            containers_created,
            containers_killed,
            image_pull_failures,
            desired_pods,
            sync_pods_duration,
        })
    }

    pub fn record_pod_sync(&self, success: bool) {
        let result = if success { "success" } else { "error" };
        self.pod_syncs.with_label_values(&[result]).inc();
    }

    pub fn record_container_created(&self) {
        self.containers_created.inc();
    }

    pub fn record_container_killed(&self) {
        self.containers_killed.inc();
    }

    pub fn record_image_pull_failure(&self) {
        self.image_pull_failures.inc();
    }

    pub fn set_desired_pods(&self, count: usize) {
        self.desired_pods.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn observe_sync_pods(&self, elapsed: std::time::Duration) {
        self.sync_pods_duration.observe(elapsed.as_secs_f64());
    }

    pub fn pod_sync_count(&self, success: bool) -> u64 {
        let result = if success { "success" } else { "error" };
        self.pod_syncs.with_label_values(&[result]).get()
    }

    pub fn containers_killed(&self) -> u64 {
        self.containers_killed.get()
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, AgentError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| AgentError::Metrics(prometheus::Error::Msg(format!("metrics are not UTF-8: {e}"))))
    }
}
