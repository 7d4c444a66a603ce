//! Config sources.
//!
//! Each source watches one origin of desired pods and sends a SET
//! [`PodUpdate`](pod_types::PodUpdate) with its full pod list whenever that
//! list changes. All sources share the sync loop's update channel.

pub mod apiserver;
pub mod file;

pub use apiserver::ApiserverSource;
pub use file::FileSource;

/// Capacity of the update channel feeding the sync loop
pub const UPDATE_CHANNEL_CAPACITY: usize = 50;
