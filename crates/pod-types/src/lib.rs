//! Pod Types
//!
//! Desired-state model for the node agent: pods, their container manifests,
//! volumes and the update events that carry them from config sources to the
//! sync loop.

pub mod container;
pub mod pod;
pub mod update;
pub mod validation;
pub mod volume;

pub use container::*;
pub use pod::*;
pub use update::*;
pub use validation::*;
pub use volume::*;
