//! Container specification
//!
//! Everything the agent needs to create, fingerprint and health-check one
//! container of a pod.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Container name, unique within the pod
    pub name: String,

    /// Image reference (`repository[:tag]`)
    pub image: String,

    /// Command line; empty means the image default
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Working directory inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Environment variables, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Exposed ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,

    /// Volume mounts, resolved against the pod's volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    /// CPU request in milli-CPU (0 = unset)
    #[serde(default)]
    pub cpu: u32,

    /// Memory limit in bytes (0 = unset)
    #[serde(default)]
    pub memory: u64,

    /// What to do with a container that is no longer running
    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<LivenessProbe>,

    /// Run the container privileged
    #[serde(default)]
    pub privileged: bool,
}

impl ContainerSpec {
    /// Minimal spec with a name and an image
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Ports that request a host binding
    pub fn host_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.host_port.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    /// Optional port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Port inside the container
    pub container_port: u16,

    /// Host port to bind; `None` means not bound on the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    /// Host interface to bind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,

    #[serde(default)]
    pub protocol: Protocol,
}

impl Port {
    pub fn new(container_port: u16) -> Self {
        Self {
            name: None,
            container_port,
            host_port: None,
            host_ip: None,
            protocol: Protocol::Tcp,
        }
    }

    #[must_use]
    pub fn with_host_port(mut self, host_port: u16) -> Self {
        self.host_port = Some(host_port);
        self
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Transport protocol of a port
///
/// Deserializes case-insensitively for the common spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    #[serde(alias = "tcp", alias = "Tcp")]
    Tcp,
    #[serde(alias = "udp", alias = "Udp")]
    Udp,
}

impl Protocol {
    /// Lowercase suffix used in runtime port keys (`80/tcp`)
    pub fn as_suffix(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Name of a volume declared by the pod
    pub name: String,
    /// Path inside the container
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Restart policy for a container
///
/// `runOnce` is accepted as an alias of `never` for manifests written
/// against older agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RestartPolicy {
    /// Recreate whenever the container is not running
    #[default]
    #[serde(alias = "Always")]
    Always,
    /// Keep a container that exited successfully
    #[serde(alias = "OnFailure")]
    OnFailure,
    /// Never recreate a stopped container
    #[serde(alias = "Never", alias = "runOnce")]
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessProbe {
    /// Seconds after container creation during which the container is
    /// considered healthy regardless of the probe
    #[serde(default)]
    pub initial_delay_seconds: i64,

    #[serde(flatten)]
    pub handler: ProbeHandler,
}

/// How a liveness probe checks the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeHandler {
    /// HTTP GET; 2xx and 3xx responses are healthy
    #[serde(rename_all = "camelCase")]
    HttpGet {
        #[serde(default = "default_probe_path")]
        path: String,
        port: u16,
        /// Defaults to the pod IP
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
    },
    /// TCP connect
    #[serde(rename_all = "camelCase")]
    TcpSocket {
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
    },
    /// Command run inside the container; exit code 0 is healthy
    Exec { command: Vec<String> },
}

fn default_probe_path() -> String {
    "/".to_string()
}
