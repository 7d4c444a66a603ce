//! Pods and their identity

use crate::container::ContainerSpec;
use crate::volume::Volume;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace used when a source does not supply one
pub const DEFAULT_NAMESPACE: &str = "default";

/// A desired pod as delivered by a config source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub manifest: ContainerManifest,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Pod {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, manifest: ContainerManifest) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            manifest,
        }
    }

    /// Globally unique key correlating this pod with its runtime containers
    pub fn full_name(&self) -> PodFullName {
        PodFullName::new(&self.name, &self.namespace)
    }

    /// Identifier that scopes the pod's volumes on disk.
    ///
    /// The manifest id when present, the pod name otherwise.
    pub fn volume_owner(&self) -> &str {
        if self.manifest.id.is_empty() {
            &self.name
        } else {
            &self.manifest.id
        }
    }
}

/// The containers and volumes of a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerManifest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Manifest id; volumes are stored under it
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub containers: Vec<ContainerSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// `<pod name>.<namespace>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodFullName(String);

impl PodFullName {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self(format!("{name}.{namespace}"))
    }

    /// Wrap an already-composed full name (e.g. one decoded from a runtime name)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodFullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PodFullName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Observed pod-level state handed to health checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodState {
    /// IP of the pod's network container, once assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
}
