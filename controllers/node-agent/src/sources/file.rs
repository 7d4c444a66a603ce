//! Manifests on local disk.
//!
//! The path is either one manifest file or a directory whose `.yaml`,
//! `.yml` and `.json` files are each one manifest. Every manifest becomes a
//! pod named after the manifest id in the default namespace.

use crate::error::AgentError;
use pod_types::{ContainerManifest, DEFAULT_NAMESPACE, Pod, PodUpdate};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const MANIFEST_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Polls a manifest file or directory
pub struct FileSource {
    path: PathBuf,
    period: Duration,
    updates: mpsc::Sender<PodUpdate>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, period: Duration, updates: mpsc::Sender<PodUpdate>) -> Self {
        Self {
            path: path.into(),
            period,
            updates,
        }
    }

    /// Poll forever, sending a SET whenever the parsed pods change.
    ///
    /// Unreadable or invalid manifests keep the previous pods in force.
    pub async fn run(self) -> Result<(), AgentError> {
        info!("Watching manifests at {} every {:?}", self.path.display(), self.period);
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sent: Option<Vec<Pod>> = None;

        loop {
            ticker.tick().await;
            let pods = match read_pods(&self.path).await {
                Ok(pods) => pods,
                Err(e) => {
                    warn!("Couldn't read manifests from {}: {}", self.path.display(), e);
                    continue;
                }
            };
            if last_sent.as_ref() == Some(&pods) {
                continue;
            }

            debug!("Manifests at {} changed: {} pods", self.path.display(), pods.len());
            self.updates
                .send(PodUpdate::set(pods.clone()))
                .await
                .map_err(|_| AgentError::Source("sync loop is gone".to_string()))?;
            last_sent = Some(pods);
        }
    }
}

/// Pods described at `path`, sorted by name
pub async fn read_pods(path: &Path) -> Result<Vec<Pod>, AgentError> {
    let metadata = tokio::fs::metadata(path).await?;
    let files = if metadata.is_dir() {
        manifest_files(path).await?
    } else {
        vec![path.to_path_buf()]
    };

    let mut pods = Vec::with_capacity(files.len());
    for file in files {
        pods.push(read_pod(&file).await?);
    }
    pods.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(pods)
}

/// Manifest files directly inside `dir`, hidden files excluded
async fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>, AgentError> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        let is_manifest = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext));
        if hidden || !is_manifest || !entry.file_type().await?.is_file() {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

async fn read_pod(file: &Path) -> Result<Pod, AgentError> {
    let raw = tokio::fs::read_to_string(file).await?;
    let is_json = file.extension().is_some_and(|ext| ext == "json");
    let mut manifest: ContainerManifest = if is_json {
        serde_json::from_str(&raw).map_err(|e| AgentError::Source(format!("{}: {}", file.display(), e)))?
    } else {
        serde_yaml::from_str(&raw).map_err(|e| AgentError::Source(format!("{}: {}", file.display(), e)))?
    };

    if manifest.id.is_empty() {
        let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem.is_empty() {
            return Err(AgentError::Source(format!("{}: manifest has no id", file.display())));
        }
        manifest.id = stem.to_string();
    }
    Ok(Pod::new(manifest.id.clone(), DEFAULT_NAMESPACE, manifest))
}
