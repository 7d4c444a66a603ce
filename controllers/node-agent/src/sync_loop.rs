//! Node-wide reconciliation.
//!
//! [`run_sync_loop`] turns the update stream into reconciliation passes and
//! [`ClusterSync`] runs one pass: dispatch a worker per desired pod, then
//! kill every managed container no desired pod accounts for.

use crate::containers::{RuntimeContainer, list_managed_containers};
use crate::error::AgentError;
use crate::metrics::AgentMetrics;
use crate::network::NETWORK_CONTAINER_NAME;
use crate::reconciler::Reconciler;
use crate::workers::PodWorkerPool;
use pod_types::{Pod, PodFullName, PodOperation, PodUpdate, filter_host_port_conflicts};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One node-wide reconciliation pass over the desired pods
#[async_trait::async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync_pods(&self, pods: &[Pod]) -> Result<(), AgentError>;
}

pub struct ClusterSync {
    reconciler: Arc<Reconciler>,
    workers: PodWorkerPool,
    metrics: Arc<AgentMetrics>,
}

impl ClusterSync {
    pub fn new(reconciler: Arc<Reconciler>, metrics: Arc<AgentMetrics>) -> Self {
        Self {
            reconciler,
            workers: PodWorkerPool::new(),
            metrics,
        }
    }

    /// Run one pass and return the handles of the workers it dispatched.
    ///
    /// Workers are not awaited: the sweep of undesired containers runs
    /// against a fresh listing while they are still working.
    pub async fn run_pass(&self, pods: &[Pod]) -> Result<Vec<JoinHandle<()>>, AgentError> {
        let started = Instant::now();
        let runtime = self.reconciler.ops().runtime();
        let snapshot = Arc::new(list_managed_containers(runtime).await?);

        let mut desired: HashSet<(PodFullName, String)> = HashSet::new();
        let mut handles = Vec::new();
        for pod in pods {
            let pod_full_name = pod.full_name();
            desired.insert((pod_full_name.clone(), NETWORK_CONTAINER_NAME.to_string()));
            for container in &pod.manifest.containers {
                desired.insert((pod_full_name.clone(), container.name.clone()));
            }

            let reconciler = self.reconciler.clone();
            let metrics = self.metrics.clone();
            let snapshot = snapshot.clone();
            let pod = pod.clone();
            let worker = self.workers.run(pod_full_name, async move {
                match reconciler.sync_pod(&pod, &snapshot).await {
                    Ok(()) => metrics.record_pod_sync(true),
                    Err(e) => {
                        error!("Error syncing pod {}, skipping: {}", pod.full_name(), e);
                        metrics.record_pod_sync(false);
                    }
                }
            });
            handles.extend(worker);
        }

        // Workers may have changed the runtime since the first listing.
        let current = list_managed_containers(runtime).await?;
        let undesired: Vec<&RuntimeContainer> = current
            .iter()
            .filter(|c| !desired.contains(&(c.pod_full_name.clone(), c.container_name.clone())))
            .collect();
        for container in undesired {
            info!(
                "Killing unwanted container {} of pod {} ({})",
                container.container_name, container.pod_full_name, container.id
            );
            if let Err(e) = self.reconciler.ops().kill_container(container).await {
                error!("Error killing container {}: {}", container.id, e);
            }
        }

        let torn_down = self.reconciler.volumes().reconcile_orphans(pods).await;
        if torn_down > 0 {
            debug!("Tore down {} orphaned volumes", torn_down);
        }

        self.metrics.set_desired_pods(pods.len());
        self.metrics.observe_sync_pods(started.elapsed());
        Ok(handles)
    }
}

#[async_trait::async_trait]
impl SyncHandler for ClusterSync {
    async fn sync_pods(&self, pods: &[Pod]) -> Result<(), AgentError> {
        self.run_pass(pods).await.map(|_| ())
    }
}

/// Consume `updates` forever, syncing on every SET and every `resync` of
/// silence.
///
/// Resyncs are skipped until the first SET arrives. Fails once every
/// sender is gone.
pub async fn run_sync_loop(
    mut updates: mpsc::Receiver<PodUpdate>,
    handler: Arc<dyn SyncHandler>,
    resync: Duration,
) -> Result<(), AgentError> {
    let mut desired: Option<Vec<Pod>> = None;
    loop {
        match tokio::time::timeout(resync, updates.recv()).await {
            Ok(Some(update)) => match update.op {
                PodOperation::Set => {
                    debug!("SET: {} pods", update.pods.len());
                    desired = Some(filter_host_port_conflicts(update.pods));
                }
                PodOperation::Update => {
                    warn!("Pod UPDATE is not implemented, ignoring {} pods", update.pods.len());
                    continue;
                }
            },
            Ok(None) => {
                return Err(AgentError::Source("every config source has stopped".to_string()));
            }
            Err(_) => debug!("Resync after {:?}", resync),
        }

        let Some(pods) = desired.as_deref() else {
            continue;
        };
        if let Err(e) = handler.sync_pods(pods).await {
            error!("Couldn't sync containers: {}", e);
        }
    }
}
