//! Pod volumes

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name, referenced by container volume mounts
    pub name: String,

    /// Backing storage; `None` leaves the volume unmounted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VolumeSource>,
}

impl Volume {
    pub fn host_dir(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Some(VolumeSource::HostDir { path: path.into() }),
        }
    }

    pub fn empty_dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Some(VolumeSource::EmptyDir {}),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    /// Existing directory on the host, bind-mounted as is
    HostDir { path: String },
    /// Scratch directory owned by the pod
    EmptyDir {},
}
