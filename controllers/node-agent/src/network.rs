//! Pod network containers.
//!
//! Each pod gets one minimal container that owns the pod's network
//! namespace and publishes every port declared by the pod. The pod's other
//! containers join that namespace.

use crate::containers::{ContainerOps, RuntimeContainers};
use crate::error::AgentError;
use crate::volumes::MountedVolumes;
use pod_types::{ContainerSpec, Pod};
use runtime_client::ImagePuller;
use std::sync::Arc;
use tracing::{info, warn};

/// Container name of every pod's network container
pub const NETWORK_CONTAINER_NAME: &str = "net";

/// Spec of `pod`'s network container: every port of every container
pub fn network_container_spec(pod: &Pod, image: &str) -> ContainerSpec {
    let mut spec = ContainerSpec::new(NETWORK_CONTAINER_NAME, image);
    spec.ports = pod
        .manifest
        .containers
        .iter()
        .flat_map(|c| c.ports.iter().cloned())
        .collect();
    spec
}

/// `container:<id>`, the network mode of containers joining the pod namespace
pub fn join_network_mode(network_container_id: &str) -> String {
    format!("container:{network_container_id}")
}

/// Result of [`NetworkContainerManager::ensure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodNetwork {
    pub container_id: String,
    /// Containers killed to rebuild the namespace; non-zero means the
    /// caller's snapshot is stale
    pub killed: usize,
}

#[derive(Clone)]
pub struct NetworkContainerManager {
    ops: ContainerOps,
    puller: Arc<dyn ImagePuller>,
    image: String,
}

impl std::fmt::Debug for NetworkContainerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkContainerManager")
            .field("image", &self.image)
            .finish_non_exhaustive()
    }
}

impl NetworkContainerManager {
    pub fn new(ops: ContainerOps, puller: Arc<dyn ImagePuller>, image: impl Into<String>) -> Self {
        Self {
            ops,
            puller,
            image: image.into(),
        }
    }

    /// Id of `pod`'s network container, creating one if it is missing.
    ///
    /// Before creating, every other container of the pod is killed: they
    /// are attached to a namespace that no longer exists.
    pub async fn ensure(&self, pod: &Pod, containers: &RuntimeContainers) -> Result<PodNetwork, AgentError> {
        let pod_full_name = pod.full_name();
        if let Some(existing) = containers.find_pod_container(&pod_full_name, NETWORK_CONTAINER_NAME) {
            return Ok(PodNetwork {
                container_id: existing.id.clone(),
                killed: 0,
            });
        }

        info!("Network container of pod {} doesn't exist, creating", pod_full_name);
        let killed = self.ops.kill_pod_containers(&pod_full_name, containers).await?;

        // The pause image is usually present already; a failed pull only
        // matters if the create below fails too.
        if let Err(e) = self.puller.pull_image(&self.image).await {
            warn!("Failed to pull network container image {}: {}", self.image, e);
        }

        let spec = network_container_spec(pod, &self.image);
        let container_id = self
            .ops
            .run_container(pod, &spec, &MountedVolumes::new(), None)
            .await
            .map_err(|e| AgentError::NetworkContainer(format!("pod {}: {}", pod_full_name, e)))?;
        Ok(PodNetwork { container_id, killed })
    }
}
