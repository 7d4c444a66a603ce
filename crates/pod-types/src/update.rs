//! Update events flowing from config sources to the sync loop

use crate::pod::Pod;
use serde::{Deserialize, Serialize};

/// What an update does to the desired pod list
///
/// Closed on purpose: a source that produces anything else fails to
/// deserialize instead of reaching the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PodOperation {
    /// Replace the desired pod list wholesale
    Set,
    /// Incremental update; accepted but not applied
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodUpdate {
    pub op: PodOperation,
    #[serde(default)]
    pub pods: Vec<Pod>,
}

impl PodUpdate {
    pub fn set(pods: Vec<Pod>) -> Self {
        Self {
            op: PodOperation::Set,
            pods,
        }
    }

    pub fn update(pods: Vec<Pod>) -> Self {
        Self {
            op: PodOperation::Update,
            pods,
        }
    }
}
