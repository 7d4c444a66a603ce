//! Container spec fingerprints for change detection.
//!
//! A running container whose name carries a different fingerprint than the
//! desired spec no longer matches it and gets recreated. The fingerprint is
//! the first 32 bits of a SHA-256 over the container spec's canonical JSON,
//! so distinct specs collide with probability about 2^-32 per pair; a
//! collision leaves a stale container running until its spec changes again.
//!
//! Every field of [`ContainerSpec`] is included. Ports and volume mounts are
//! sorted first since their order does not change the container. Environment
//! order is kept: later duplicates override earlier ones.
//!
//! `0` is never produced; it marks names without a fingerprint.

use pod_types::ContainerSpec;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Fingerprint of a container spec, never `0`
pub fn fingerprint(spec: &ContainerSpec) -> u32 {
    let mut canonical = spec.clone();
    canonical.ports.sort();
    canonical.volume_mounts.sort();

    let mut hasher = Sha256::new();
    match serde_json::to_vec(&canonical) {
        Ok(bytes) => hasher.update(&bytes),
        Err(e) => {
            warn!("Falling back to debug form to fingerprint container {}: {}", spec.name, e);
            hasher.update(format!("{canonical:?}").as_bytes());
        }
    }
    let digest = hasher.finalize();
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    if value == 0 { 1 } else { value }
}
