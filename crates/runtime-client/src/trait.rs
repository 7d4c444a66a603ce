//! Runtime traits for mocking
//!
//! These traits abstract the container runtime so the agent can be unit
//! tested against an in-memory runtime. [`crate::DockerClient`] implements
//! all three; tests use `MockRuntime` (feature `test-util`).

use crate::error::RuntimeError;
use crate::models::*;

/// Container lifecycle operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers; `all` includes stopped ones
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Create a container and return its id
    async fn create_container(&self, options: &CreateContainerOptions) -> Result<String, RuntimeError>;

    /// Start a created container
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stop a container, killing it after `grace_seconds`
    async fn stop_container(&self, id: &str, grace_seconds: u32) -> Result<(), RuntimeError>;

    /// Remove a container; `force` removes it even while running
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Inspect a single container
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError>;
}

/// Fetches images so containers can be created from them
#[async_trait::async_trait]
pub trait ImagePuller: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;
}

/// Runs commands inside running containers
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run_in_container(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError>;
}
