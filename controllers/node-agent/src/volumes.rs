//! Pod volumes.
//!
//! Volumes are identified node-wide as `<pod id>/<volume name>`, the pod id
//! being [`Pod::volume_owner`]. Empty-dir volumes live under
//! `<root>/<pod id>/volumes/empty/<name>`; that tree is also how mounted
//! volumes are rediscovered after a restart.

use crate::error::AgentError;
use pod_types::{Pod, Volume, VolumeSource};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name for empty-dir volumes under a pod's volume root
const EMPTY_DIR_KIND: &str = "empty";

/// Volume name → host path, for building binds
pub type MountedVolumes = HashMap<String, PathBuf>;

/// Storage backend of one volume
#[async_trait::async_trait]
pub trait VolumeBuilder: Send + Sync + Debug {
    /// Prepare the backing storage
    async fn set_up(&self) -> Result<(), AgentError>;

    /// Release the backing storage
    async fn tear_down(&self) -> Result<(), AgentError>;

    /// Host path to bind into containers
    fn path(&self) -> PathBuf;
}

/// An existing host directory, bound as is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDir {
    path: PathBuf,
}

impl HostDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl VolumeBuilder for HostDir {
    async fn set_up(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn tear_down(&self) -> Result<(), AgentError> {
        Ok(())
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }
}

/// Scratch directory owned by one pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyDir {
    name: String,
    pod_id: String,
    root_dir: PathBuf,
}

impl EmptyDir {
    pub fn new(name: impl Into<String>, pod_id: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            pod_id: pod_id.into(),
            root_dir: root_dir.into(),
        }
    }
}

#[async_trait::async_trait]
impl VolumeBuilder for EmptyDir {
    async fn set_up(&self) -> Result<(), AgentError> {
        let path = self.path();
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| AgentError::Volume(format!("creating {}: {}", path.display(), e)))
    }

    async fn tear_down(&self) -> Result<(), AgentError> {
        let path = self.path();
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::Volume(format!("removing {}: {}", path.display(), e))),
        }
    }

    fn path(&self) -> PathBuf {
        self.root_dir
            .join(&self.pod_id)
            .join("volumes")
            .join(EMPTY_DIR_KIND)
            .join(&self.name)
    }
}

/// Builder for a declared volume; `None` when the volume has no source
pub fn create_volume_builder(volume: &Volume, pod_id: &str, root_dir: &Path) -> Option<Box<dyn VolumeBuilder>> {
    match volume.source.as_ref()? {
        VolumeSource::HostDir { path } => Some(Box::new(HostDir::new(path))),
        VolumeSource::EmptyDir {} => Some(Box::new(EmptyDir::new(&volume.name, pod_id, root_dir))),
    }
}

/// Mounts pod volumes and cleans up the ones no pod wants any more
#[derive(Debug, Clone)]
pub struct VolumeManager {
    root_dir: PathBuf,
}

impl VolumeManager {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Set up every declared volume of `pod`.
    ///
    /// Stops at the first failure; volumes set up before it stay in place.
    pub async fn mount_all(&self, pod: &Pod) -> Result<MountedVolumes, AgentError> {
        let mut mounted = MountedVolumes::new();
        for volume in &pod.manifest.volumes {
            let Some(builder) = create_volume_builder(volume, pod.volume_owner(), &self.root_dir) else {
                debug!("Volume {} of pod {} has no source, skipping", volume.name, pod.full_name());
                continue;
            };
            builder.set_up().await.map_err(|e| {
                AgentError::Volume(format!("volume {} of pod {}: {}", volume.name, pod.full_name(), e))
            })?;
            mounted.insert(volume.name.clone(), builder.path());
        }
        Ok(mounted)
    }

    /// Volumes present on disk, keyed `<pod id>/<volume name>`
    pub async fn current_volumes(&self) -> HashMap<String, Box<dyn VolumeBuilder>> {
        let mut current: HashMap<String, Box<dyn VolumeBuilder>> = HashMap::new();
        for pod_id in list_dir_names(&self.root_dir).await {
            let kind_dir = self.root_dir.join(&pod_id).join("volumes").join(EMPTY_DIR_KIND);
            for name in list_dir_names(&kind_dir).await {
                let builder = EmptyDir::new(name.clone(), pod_id.clone(), self.root_dir.clone());
                current.insert(format!("{pod_id}/{name}"), Box::new(builder));
            }
        }
        current
    }

    /// Tear down every volume on disk that no desired pod declares.
    ///
    /// Each teardown is independent; failures are logged. Returns the number
    /// of volumes torn down.
    pub async fn reconcile_orphans(&self, pods: &[Pod]) -> usize {
        let desired: HashSet<String> = pods
            .iter()
            .flat_map(|pod| {
                pod.manifest
                    .volumes
                    .iter()
                    .map(move |v| format!("{}/{}", pod.volume_owner(), v.name))
            })
            .collect();

        let mut torn_down = 0;
        for (id, volume) in self.current_volumes().await {
            if desired.contains(&id) {
                continue;
            }
            info!("Orphaned volume {} found, tearing down volume", id);
            match volume.tear_down().await {
                Ok(()) => torn_down += 1,
                Err(e) => warn!("Could not tear down volume {}: {}", id, e),
            }
        }
        torn_down
    }
}

/// Names of the subdirectories of `dir`; empty when it cannot be read
async fn list_dir_names(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        if is_dir && let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names
}
