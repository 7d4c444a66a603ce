//! Single-pod reconciliation.
//!
//! [`Reconciler::sync_pod`] drives the runtime toward one pod's manifest:
//! network container first, then volumes, then each declared container in
//! order, and finally a sweep of the pod's containers nobody claimed.

use crate::containers::{ContainerOps, RuntimeContainer, RuntimeContainers, list_managed_containers};
use crate::error::AgentError;
use crate::fingerprint::fingerprint;
use crate::health::{HealthEvaluator, HealthStatus};
use crate::network::{NETWORK_CONTAINER_NAME, NetworkContainerManager, join_network_mode};
use crate::node::pod_info;
use crate::volumes::VolumeManager;
use pod_types::{ContainerSpec, Pod, PodFullName, PodState, RestartPolicy};
use runtime_client::ImagePuller;
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What to do with a container that still matches its spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Recreate,
    /// Neither kept nor killed here; the end-of-pass sweep removes it
    Skip,
}

/// Reconciles one pod at a time against the runtime
#[derive(Clone)]
pub struct Reconciler {
    ops: ContainerOps,
    puller: Arc<dyn ImagePuller>,
    network: NetworkContainerManager,
    volumes: VolumeManager,
    health: HealthEvaluator,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("network", &self.network)
            .field("volumes", &self.volumes)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        ops: ContainerOps,
        puller: Arc<dyn ImagePuller>,
        network: NetworkContainerManager,
        volumes: VolumeManager,
        health: HealthEvaluator,
    ) -> Self {
        Self {
            ops,
            puller,
            network,
            volumes,
            health,
        }
    }

    pub fn ops(&self) -> &ContainerOps {
        &self.ops
    }

    pub fn volumes(&self) -> &VolumeManager {
        &self.volumes
    }

    /// Converge `pod` given a snapshot of the node's managed containers.
    ///
    /// Only network container and volume failures fail the pass; a
    /// container that cannot be pulled, created or killed is logged and
    /// retried on the next pass.
    pub async fn sync_pod(&self, pod: &Pod, containers: &RuntimeContainers) -> Result<(), AgentError> {
        let pod_full_name = pod.full_name();
        let mut keep: HashSet<String> = HashSet::new();
        let mut killed: HashSet<String> = HashSet::new();

        let network = self.network.ensure(pod, containers).await.inspect_err(|e| {
            error!("Failed to introspect network container ({}), skipping pod {}", e, pod_full_name);
        })?;
        let containers: Cow<'_, RuntimeContainers> = if network.killed > 0 {
            // The snapshot still lists what was just killed.
            Cow::Owned(list_managed_containers(self.ops.runtime()).await.inspect_err(|e| {
                error!("Error listing containers for pod {}: {}", pod_full_name, e);
            })?)
        } else {
            Cow::Borrowed(containers)
        };
        keep.insert(network.container_id.clone());

        let volumes = self.volumes.mount_all(pod).await.inspect_err(|e| {
            error!("Unable to mount volumes for pod {} ({}), skipping pod", pod_full_name, e);
        })?;

        let pod_state = self.pod_state(&pod_full_name).await;
        let network_mode = join_network_mode(&network.container_id);

        for spec in &pod.manifest.containers {
            let expected = fingerprint(spec);
            if let Some(existing) = containers.find_pod_container(&pod_full_name, &spec.name) {
                debug!("Pod {} container {} exists as {}", pod_full_name, spec.name, existing.id);
                if existing.fingerprint == 0 || existing.fingerprint == expected {
                    match self.judge_existing(&pod_full_name, &pod_state, spec, existing).await {
                        Verdict::Keep => {
                            keep.insert(existing.id.clone());
                            continue;
                        }
                        Verdict::Skip => continue,
                        Verdict::Recreate => {}
                    }
                    info!("Pod {} container {} is unhealthy, recreating", pod_full_name, spec.name);
                } else {
                    info!(
                        "Pod {} container {} changed ({:08x} vs {:08x}), recreating",
                        pod_full_name, spec.name, existing.fingerprint, expected
                    );
                }
                if let Err(e) = self.ops.kill_container(existing).await {
                    warn!("Failed to kill container {}: {}", existing.id, e);
                    continue;
                }
                killed.insert(existing.id.clone());
            }

            info!("Pod {} container {} doesn't exist, creating", pod_full_name, spec.name);
            if let Err(e) = self.puller.pull_image(&spec.image).await {
                self.ops.metrics().record_image_pull_failure();
                error!(
                    "Failed to pull image {} ({}), skipping pod {} container {}",
                    spec.image, e, pod_full_name, spec.name
                );
                continue;
            }
            match self.ops.run_container(pod, spec, &volumes, Some(&network_mode)).await {
                Ok(id) => {
                    keep.insert(id);
                }
                Err(e) => error!("Error running pod {} container {}: {}", pod_full_name, spec.name, e),
            }
        }

        // Duplicates and leftovers from crashed or partial passes.
        for container in containers.pod_containers(&pod_full_name) {
            if keep.contains(&container.id) || killed.contains(&container.id) {
                continue;
            }
            if let Err(e) = self.ops.kill_container(container).await {
                error!("Error killing container {}: {}", container.id, e);
            }
        }

        Ok(())
    }

    /// Pod IP from the network container; empty state when unavailable
    async fn pod_state(&self, pod_full_name: &PodFullName) -> PodState {
        match pod_info(self.ops.runtime(), pod_full_name).await {
            Ok(info) => PodState {
                pod_ip: info.get(NETWORK_CONTAINER_NAME).and_then(|s| s.ip.clone()),
            },
            Err(e) => {
                warn!("Unable to get pod info for {}, health checks may be invalid: {}", pod_full_name, e);
                PodState::default()
            }
        }
    }

    /// Keep or recreate a container whose fingerprint matches.
    ///
    /// A checker error or unknown result keeps the container for this pass.
    /// A container that cannot be inspected is skipped, which leaves it to
    /// the sweep.
    async fn judge_existing(
        &self,
        pod_full_name: &PodFullName,
        pod_state: &PodState,
        spec: &ContainerSpec,
        existing: &RuntimeContainer,
    ) -> Verdict {
        let details = match self.ops.runtime().inspect_container(&existing.id).await {
            Ok(details) => details,
            Err(e) => {
                error!("Error inspecting container {}: {}", existing.id, e);
                return Verdict::Skip;
            }
        };

        if !details.state.running {
            let keep_stopped = match spec.restart_policy {
                RestartPolicy::Never => true,
                RestartPolicy::OnFailure => details.state.exit_code == 0,
                RestartPolicy::Always => false,
            };
            if keep_stopped {
                info!(
                    "Allowing pod {} container {} ({}) to remain stopped due to {:?} restart policy",
                    pod_full_name, spec.name, existing.id, spec.restart_policy
                );
                return Verdict::Keep;
            }
        }

        match self.health.evaluate(pod_full_name, pod_state, spec, existing, &details).await {
            Ok(HealthStatus::Healthy) => Verdict::Keep,
            Ok(HealthStatus::Unknown) => {
                debug!("Health of pod {} container {} is unknown", pod_full_name, spec.name);
                Verdict::Keep
            }
            Ok(HealthStatus::Unhealthy) => Verdict::Recreate,
            Err(e) => {
                debug!("Health check of pod {} container {} errored: {}", pod_full_name, spec.name, e);
                Verdict::Keep
            }
        }
    }
}
