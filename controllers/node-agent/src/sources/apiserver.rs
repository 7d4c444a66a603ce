//! Pods bound to this node, watched on the Kubernetes API server.

use crate::backoff::FibonacciBackoff;
use crate::error::AgentError;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Api, Client};
use kube_runtime::watcher;
use pod_types::{
    ContainerManifest, ContainerSpec, DEFAULT_NAMESPACE, EnvVar, LivenessProbe, Pod, PodFullName, PodUpdate, Port,
    ProbeHandler, Protocol, RestartPolicy, Volume, VolumeMount, VolumeSource,
};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const MIN_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 30;

/// Watches core/v1 Pods scheduled to one node
pub struct ApiserverSource {
    api: Api<core::Pod>,
    hostname: String,
    updates: mpsc::Sender<PodUpdate>,
}

impl ApiserverSource {
    pub fn new(client: Client, hostname: String, updates: mpsc::Sender<PodUpdate>) -> Self {
        Self {
            api: Api::all(client),
            hostname,
            updates,
        }
    }

    /// Watch forever; a broken watch restarts after a backoff.
    pub async fn run(self) -> Result<(), AgentError> {
        info!("Watching pods bound to node {}", self.hostname);
        let mut backoff = FibonacciBackoff::new(MIN_BACKOFF_SECS, MAX_BACKOFF_SECS);
        let mut cache = PodCache::default();
        loop {
            match self.watch(&mut cache, &mut backoff).await {
                Ok(()) => warn!("Pod watch for node {} ended", self.hostname),
                Err(e @ AgentError::Source(_)) => return Err(e),
                Err(e) => warn!("Pod watch for node {} failed: {}", self.hostname, e),
            }
            let delay = backoff.next_backoff();
            debug!("Restarting pod watch in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn watch(&self, cache: &mut PodCache, backoff: &mut FibonacciBackoff) -> Result<(), AgentError> {
        let selector = format!("spec.nodeName={}", self.hostname);
        let config = watcher::Config::default().fields(&selector);
        let mut stream = Box::pin(watcher(self.api.clone(), config));

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| AgentError::Watch(format!("pod watch stream error: {}", e)))?
        {
            if matches!(event, watcher::Event::InitDone | watcher::Event::Apply(_)) {
                backoff.reset();
            }
            let Some(pods) = cache.handle(event) else {
                continue;
            };
            debug!("Pods bound to {} changed: {} pods", self.hostname, pods.len());
            self.updates
                .send(PodUpdate::set(pods))
                .await
                .map_err(|_| AgentError::Source("sync loop is gone".to_string()))?;
        }
        Ok(())
    }
}

/// Local copy of the watched pods, keyed by full name
#[derive(Debug, Default)]
pub struct PodCache {
    pods: BTreeMap<String, Pod>,
    /// Pods of a relist in progress
    relist: Option<BTreeMap<String, Pod>>,
}

impl PodCache {
    /// Fold one watch event in; returns the full pod list when it changed
    pub fn handle(&mut self, event: watcher::Event<core::Pod>) -> Option<Vec<Pod>> {
        match event {
            watcher::Event::Init => {
                self.relist = Some(BTreeMap::new());
                None
            }
            watcher::Event::InitApply(pod) => {
                let pod = convert_pod(&pod)?;
                self.relist
                    .get_or_insert_with(BTreeMap::new)
                    .insert(pod.full_name().to_string(), pod);
                None
            }
            watcher::Event::InitDone => {
                self.pods = self.relist.take().unwrap_or_default();
                Some(self.snapshot())
            }
            watcher::Event::Apply(pod) => {
                let pod = convert_pod(&pod)?;
                let key = pod.full_name().to_string();
                if self.pods.get(&key) == Some(&pod) {
                    return None;
                }
                self.pods.insert(key, pod);
                Some(self.snapshot())
            }
            watcher::Event::Delete(pod) => {
                let name = pod.metadata.name.as_deref()?;
                let namespace = pod.metadata.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
                let key = PodFullName::new(name, namespace).to_string();
                self.pods.remove(&key)?;
                Some(self.snapshot())
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Pod> {
        self.pods.values().cloned().collect()
    }
}

/// Desired pod for a Kubernetes pod; `None` without a name or spec
pub fn convert_pod(pod: &core::Pod) -> Option<Pod> {
    let name = pod.metadata.name.clone()?;
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let spec = pod.spec.as_ref()?;

    let restart_policy = match spec.restart_policy.as_deref() {
        Some("Never") => RestartPolicy::Never,
        Some("OnFailure") => RestartPolicy::OnFailure,
        _ => RestartPolicy::Always,
    };
    let containers = spec
        .containers
        .iter()
        .map(|c| convert_container(c, restart_policy))
        .collect();
    let volumes = spec.volumes.iter().flatten().map(convert_volume).collect();

    let id = pod.metadata.uid.clone().unwrap_or_else(|| name.clone());
    Some(Pod::new(
        name,
        namespace,
        ContainerManifest {
            version: "v1".to_string(),
            id,
            containers,
            volumes,
        },
    ))
}

fn convert_container(container: &core::Container, restart_policy: RestartPolicy) -> ContainerSpec {
    let mut spec = ContainerSpec::new(&container.name, container.image.clone().unwrap_or_default());
    spec.command = container
        .command
        .iter()
        .flatten()
        .chain(container.args.iter().flatten())
        .cloned()
        .collect();
    spec.working_dir = container.working_dir.clone();
    // Only literal values; references need the API and are not resolved here.
    spec.env = container
        .env
        .iter()
        .flatten()
        .filter_map(|e| e.value.as_ref().map(|v| EnvVar::new(&e.name, v)))
        .collect();
    spec.ports = container
        .ports
        .iter()
        .flatten()
        .filter_map(|p| convert_port(&container.name, p))
        .collect();
    spec.volume_mounts = container
        .volume_mounts
        .iter()
        .flatten()
        .map(|m| VolumeMount {
            name: m.name.clone(),
            mount_path: m.mount_path.clone(),
            read_only: m.read_only.unwrap_or(false),
        })
        .collect();

    if let Some(resources) = &container.resources {
        spec.cpu = resource(resources, "cpu").and_then(milli_cpu).unwrap_or(0);
        spec.memory = resource(resources, "memory").and_then(memory_bytes).unwrap_or(0);
    }

    spec.restart_policy = restart_policy;
    spec.liveness_probe = container
        .liveness_probe
        .as_ref()
        .and_then(|probe| convert_probe(probe, &spec.ports));
    spec.privileged = container
        .security_context
        .as_ref()
        .and_then(|s| s.privileged)
        .unwrap_or(false);
    spec
}

/// Requested amount of `key`, falling back to its limit
fn resource<'a>(resources: &'a core::ResourceRequirements, key: &str) -> Option<&'a Quantity> {
    resources
        .requests
        .as_ref()
        .and_then(|r| r.get(key))
        .or_else(|| resources.limits.as_ref().and_then(|l| l.get(key)))
}

fn convert_port(container: &str, port: &core::ContainerPort) -> Option<Port> {
    let Ok(container_port) = u16::try_from(port.container_port) else {
        warn!("Container {} declares invalid port {}, skipping", container, port.container_port);
        return None;
    };
    let protocol = match port.protocol.as_deref() {
        Some(p) if p.eq_ignore_ascii_case("udp") => Protocol::Udp,
        _ => Protocol::Tcp,
    };
    Some(Port {
        name: port.name.clone(),
        container_port,
        host_port: port.host_port.and_then(|p| u16::try_from(p).ok()).filter(|p| *p != 0),
        host_ip: port.host_ip.clone(),
        protocol,
    })
}

fn convert_probe(probe: &core::Probe, ports: &[Port]) -> Option<LivenessProbe> {
    let handler = if let Some(http) = &probe.http_get {
        ProbeHandler::HttpGet {
            path: http.path.clone().unwrap_or_else(|| "/".to_string()),
            port: resolve_port(&http.port, ports)?,
            host: http.host.clone(),
        }
    } else if let Some(tcp) = &probe.tcp_socket {
        ProbeHandler::TcpSocket {
            port: resolve_port(&tcp.port, ports)?,
            host: tcp.host.clone(),
        }
    } else if let Some(exec) = &probe.exec {
        ProbeHandler::Exec {
            command: exec.command.clone().unwrap_or_default(),
        }
    } else {
        return None;
    };
    Some(LivenessProbe {
        initial_delay_seconds: i64::from(probe.initial_delay_seconds.unwrap_or(0)),
        handler,
    })
}

/// Port number, or the container port carrying that name
fn resolve_port(port: &IntOrString, ports: &[Port]) -> Option<u16> {
    match port {
        IntOrString::Int(n) => u16::try_from(*n).ok(),
        IntOrString::String(s) => s.parse().ok().or_else(|| {
            ports
                .iter()
                .find(|p| p.name.as_deref() == Some(s.as_str()))
                .map(|p| p.container_port)
        }),
    }
}

fn convert_volume(volume: &core::Volume) -> Volume {
    let source = if let Some(host_path) = &volume.host_path {
        Some(VolumeSource::HostDir {
            path: host_path.path.clone(),
        })
    } else if volume.empty_dir.is_some() {
        Some(VolumeSource::EmptyDir {})
    } else {
        debug!("Volume {} has an unsupported source", volume.name);
        None
    };
    Volume {
        name: volume.name.clone(),
        source,
    }
}

/// Numeric value of a resource quantity (`500m`, `1.5`, `64Mi`, `1e3`)
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier = match suffix {
        "" => 1.0,
        "m" => return Some(number / 1000.0),
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exp if exp.starts_with(['e', 'E']) => 10f64.powi(exp[1..].parse().ok()?),
        _ => return None,
    };
    Some(number * multiplier)
}

fn milli_cpu(quantity: &Quantity) -> Option<u32> {
    let cores = parse_quantity(&quantity.0)?;
    (cores >= 0.0).then(|| (cores * 1000.0).round().min(f64::from(u32::MAX)) as u32)
}

fn memory_bytes(quantity: &Quantity) -> Option<u64> {
    let bytes = parse_quantity(&quantity.0)?;
    (bytes >= 0.0).then(|| bytes.round() as u64)
}
