//! Runtime data models
//!
//! Field names follow the Docker Engine API (PascalCase on the wire).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of a container listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: String,

    /// Names as reported by the runtime; Docker prefixes them with `/`
    #[serde(default)]
    pub names: Vec<String>,

    #[serde(default)]
    pub image: String,

    /// Creation time, seconds since the epoch
    #[serde(default)]
    pub created: i64,

    /// `created`, `running`, `exited`, ...
    #[serde(default)]
    pub state: String,
}

impl ContainerSummary {
    /// The name the agent encoded at creation time
    pub fn primary_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Result of inspecting a single container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDetails {
    #[serde(rename = "Id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub created: DateTime<Utc>,

    #[serde(default)]
    pub state: ContainerState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_settings: Option<NetworkSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<InspectConfig>,
}

impl ContainerDetails {
    /// Assigned IP, if the runtime reports a non-empty one
    pub fn ip_address(&self) -> Option<&str> {
        self.network_settings
            .as_ref()
            .map(|n| n.ip_address.as_str())
            .filter(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct InspectConfig {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub hostname: String,
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateContainerOptions {
    /// Container name; the agent encodes pod identity and fingerprint in it
    pub name: String,
    pub config: ContainerConfig,
}

/// Body of a create request
///
/// The host configuration travels with the create call: the Engine API no
/// longer accepts it on start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Keys are `<port>/<tcp|udp>`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, EmptyObject>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,

    /// Memory limit in bytes, 0 = unlimited
    #[serde(default)]
    pub memory: u64,

    /// Relative CPU weight, 0 = runtime default
    #[serde(default)]
    pub cpu_shares: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default)]
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,

    /// `<host path>:<container path>[:ro]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,

    /// `container:<id>` to join another container's network namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

/// Serializes as `{}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EmptyObject {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CreateContainerResponse {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

/// Output of a command run inside a container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    /// Combined stdout and stderr
    pub output: Vec<u8>,
    /// Exit code, when the runtime reports one
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// `repository[:tag]`, split for pulls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Splits on the last `:` that comes after the last `/`, so registry
    /// ports (`registry:5000/app`) are not mistaken for tags. Digests
    /// (`app@sha256:...`) stay in the repository with an empty tag.
    pub fn parse(image: &str) -> Self {
        if image.contains('@') {
            return Self {
                repository: image.to_string(),
                tag: String::new(),
            };
        }
        let slash = image.rfind('/').map_or(0, |i| i + 1);
        match image[slash..].rfind(':') {
            Some(colon) => Self {
                repository: image[..slash + colon].to_string(),
                tag: image[slash + colon + 1..].to_string(),
            },
            None => Self {
                repository: image.to_string(),
                tag: "latest".to_string(),
            },
        }
    }
}
