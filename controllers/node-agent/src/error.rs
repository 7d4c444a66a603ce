//! Agent-specific error types.
//!
//! This module defines error types specific to the node agent that are not
//! covered by upstream library errors.

use kube::Error as KubeError;
use runtime_client::RuntimeError;
use thiserror::Error;

/// Errors that can occur in the node agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Container runtime error
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Filesystem or socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Volume set-up or tear-down failed
    #[error("Volume error: {0}")]
    Volume(String),

    /// The pod's network container could not be created
    #[error("Network container error: {0}")]
    NetworkContainer(String),

    /// A health check could not be evaluated
    #[error("Health check error: {0}")]
    HealthCheck(String),

    /// No managed container matches the pod and container name
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A config source failed to produce pods
    #[error("Config source error: {0}")]
    Source(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// The metrics service failed or answered garbage
    #[error("Stats error: {0}")]
    Stats(String),

    /// An event could not be recorded
    #[error("Event sink error: {0}")]
    Events(String),
}
