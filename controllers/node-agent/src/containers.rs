//! Managed runtime containers: listing, creation and killing.

use crate::error::AgentError;
use crate::events::{ContainerEvent, ContainerEventKind, EventSink};
use crate::fingerprint::fingerprint;
use crate::metrics::AgentMetrics;
use crate::naming::{build_container_name, parse_container_name};
use crate::volumes::MountedVolumes;
use futures::future::join_all;
use pod_types::{ContainerSpec, Pod, PodFullName};
use runtime_client::{
    ContainerConfig, ContainerRuntime, CreateContainerOptions, EmptyObject, HostConfig, PortBinding, RuntimeError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const MIN_SHARES: u64 = 2;
const SHARES_PER_CPU: u64 = 1024;
const MILLI_CPU_TO_CPU: u64 = 1000;

/// A runtime container the agent created, with its decoded name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContainer {
    pub id: String,
    /// Raw runtime name
    pub name: String,
    pub pod_full_name: PodFullName,
    pub container_name: String,
    /// `0` when the name carries none
    pub fingerprint: u32,
    /// Seconds since the epoch
    pub created: i64,
    pub running: bool,
}

/// Snapshot of every managed container on the node, in listing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeContainers(Vec<RuntimeContainer>);

impl RuntimeContainers {
    pub fn new(containers: Vec<RuntimeContainer>) -> Self {
        Self(containers)
    }

    /// First container of `pod_full_name` named `container_name`
    pub fn find_pod_container(&self, pod_full_name: &PodFullName, container_name: &str) -> Option<&RuntimeContainer> {
        self.0
            .iter()
            .find(|c| &c.pod_full_name == pod_full_name && c.container_name == container_name)
    }

    /// Every container belonging to `pod_full_name`
    pub fn pod_containers<'a>(&'a self, pod_full_name: &'a PodFullName) -> impl Iterator<Item = &'a RuntimeContainer> {
        self.0.iter().filter(move |c| &c.pod_full_name == pod_full_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeContainer> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// List every container (running or not) whose name the agent can decode
pub async fn list_managed_containers(runtime: &dyn ContainerRuntime) -> Result<RuntimeContainers, RuntimeError> {
    let listed = runtime.list_containers(true).await?;
    let managed = listed
        .into_iter()
        .filter_map(|summary| {
            let name = summary.primary_name()?.to_string();
            let parsed = parse_container_name(&name)?;
            Some(RuntimeContainer {
                running: summary.is_running(),
                id: summary.id,
                name,
                pod_full_name: parsed.pod_full_name,
                container_name: parsed.container_name,
                fingerprint: parsed.fingerprint,
                created: summary.created,
            })
        })
        .collect();
    Ok(RuntimeContainers(managed))
}

/// CPU shares for a milli-CPU request; `0` leaves the runtime default
pub fn milli_cpu_to_shares(milli_cpu: u32) -> u64 {
    if milli_cpu == 0 {
        return 0;
    }
    let shares = u64::from(milli_cpu) * SHARES_PER_CPU / MILLI_CPU_TO_CPU;
    shares.max(MIN_SHARES)
}

/// `NAME=value` in declaration order
pub fn make_environment(spec: &ContainerSpec) -> Vec<String> {
    spec.env.iter().map(|e| format!("{}={}", e.name, e.value)).collect()
}

/// Binds for mounts whose volume was mounted; others are skipped
pub fn make_binds(spec: &ContainerSpec, volumes: &MountedVolumes) -> Vec<String> {
    spec.volume_mounts
        .iter()
        .filter_map(|mount| {
            let Some(path) = volumes.get(&mount.name) else {
                warn!("Container {} mounts unknown volume {}, skipping", spec.name, mount.name);
                return None;
            };
            let mode = if mount.read_only { ":ro" } else { "" };
            Some(format!("{}:{}{}", path.display(), mount.mount_path, mode))
        })
        .collect()
}

/// Exposed ports and host bindings for ports that request a host port
pub fn make_port_bindings(
    spec: &ContainerSpec,
) -> (BTreeMap<String, EmptyObject>, BTreeMap<String, Vec<PortBinding>>) {
    let mut exposed = BTreeMap::new();
    let mut bindings = BTreeMap::new();
    for port in spec.host_ports() {
        let Some(host_port) = port.host_port else {
            continue;
        };
        let key = format!("{}/{}", port.container_port, port.protocol.as_suffix());
        exposed.insert(key.clone(), EmptyObject {});
        bindings.entry(key).or_insert_with(Vec::new).push(PortBinding {
            host_ip: port.host_ip.clone().unwrap_or_default(),
            host_port: host_port.to_string(),
        });
    }
    (exposed, bindings)
}

/// Create request for one container of `pod`.
///
/// With `network_mode` set the container joins another container's
/// namespace; the runtime rejects hostnames and published ports for such
/// containers, so those belong to the network container alone.
pub fn container_config(
    pod: &Pod,
    spec: &ContainerSpec,
    volumes: &MountedVolumes,
    network_mode: Option<&str>,
) -> ContainerConfig {
    let (exposed_ports, port_bindings, hostname) = match network_mode {
        Some(_) => (BTreeMap::new(), BTreeMap::new(), String::new()),
        None => {
            let (exposed, bindings) = make_port_bindings(spec);
            (exposed, bindings, pod.name.clone())
        }
    };
    ContainerConfig {
        image: spec.image.clone(),
        cmd: spec.command.clone(),
        env: make_environment(spec),
        exposed_ports,
        hostname,
        memory: spec.memory,
        cpu_shares: milli_cpu_to_shares(spec.cpu),
        working_dir: spec.working_dir.clone(),
        host_config: HostConfig {
            port_bindings,
            binds: make_binds(spec, volumes),
            network_mode: network_mode.map(str::to_string),
            privileged: spec.privileged,
        },
    }
}

/// Creates and kills managed containers, recording events and metrics
#[derive(Clone)]
pub struct ContainerOps {
    runtime: Arc<dyn ContainerRuntime>,
    events: Arc<dyn EventSink>,
    metrics: Arc<AgentMetrics>,
    stop_grace_secs: u32,
}

impl std::fmt::Debug for ContainerOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerOps")
            .field("stop_grace_secs", &self.stop_grace_secs)
            .finish_non_exhaustive()
    }
}

impl ContainerOps {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        events: Arc<dyn EventSink>,
        metrics: Arc<AgentMetrics>,
        stop_grace_secs: u32,
    ) -> Self {
        Self {
            runtime,
            events,
            metrics,
            stop_grace_secs,
        }
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    async fn record_event(&self, event: ContainerEvent) {
        if let Err(e) = self.events.record(event).await {
            warn!("Failed to record container event: {}", e);
        }
    }

    /// Create and start `spec` as a container of `pod`; returns the new id
    pub async fn run_container(
        &self,
        pod: &Pod,
        spec: &ContainerSpec,
        volumes: &MountedVolumes,
        network_mode: Option<&str>,
    ) -> Result<String, AgentError> {
        let pod_full_name = pod.full_name();
        let options = CreateContainerOptions {
            name: build_container_name(&pod_full_name, &spec.name, fingerprint(spec)),
            config: container_config(pod, spec, volumes, network_mode),
        };
        let id = self.runtime.create_container(&options).await?;
        self.runtime.start_container(&id).await?;
        debug!("Started pod {} container {} as {}", pod_full_name, spec.name, id);

        self.metrics.record_container_created();
        self.record_event(
            ContainerEvent::new(ContainerEventKind::Start, pod_full_name, &spec.name, &id).with_image(&spec.image),
        )
        .await;
        Ok(id)
    }

    /// Stop then remove. A stop failure is logged and removal still tried;
    /// the removal decides the result.
    pub async fn kill_container(&self, container: &RuntimeContainer) -> Result<(), RuntimeError> {
        info!(
            "Killing pod {} container {} ({})",
            container.pod_full_name, container.container_name, container.id
        );
        if let Err(e) = self.runtime.stop_container(&container.id, self.stop_grace_secs).await {
            error!("Error stopping container {}: {}", container.id, e);
        }
        self.runtime.remove_container(&container.id, true).await?;

        self.metrics.record_container_killed();
        self.record_event(ContainerEvent::new(
            ContainerEventKind::Stop,
            container.pod_full_name.clone(),
            &container.container_name,
            &container.id,
        ))
        .await;
        Ok(())
    }

    /// Kill every container of `pod_full_name` concurrently.
    ///
    /// Returns how many were killed, or an error naming every failure.
    pub async fn kill_pod_containers(
        &self,
        pod_full_name: &PodFullName,
        containers: &RuntimeContainers,
    ) -> Result<usize, AgentError> {
        let targets: Vec<&RuntimeContainer> = containers.pod_containers(pod_full_name).collect();
        let results = join_all(targets.iter().map(|c| self.kill_container(c))).await;

        let failures: Vec<String> = targets
            .iter()
            .zip(results)
            .filter_map(|(c, result)| result.err().map(|e| format!("{}: {}", c.id, e)))
            .collect();
        if failures.is_empty() {
            Ok(targets.len())
        } else {
            Err(AgentError::Runtime(RuntimeError::Api(format!(
                "failed to delete containers of pod {} ({})",
                pod_full_name,
                failures.join(", ")
            ))))
        }
    }
}
