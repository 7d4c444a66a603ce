//! Container Runtime Client
//!
//! The node agent's view of the container runtime: list, create, start, stop,
//! remove and inspect containers, pull images and run commands inside
//! containers. The agent only depends on the traits in [`runtime_trait`];
//! [`DockerClient`] implements them against the Docker Engine HTTP API.
//!
//! # Example
//!
//! ```no_run
//! use runtime_client::{ContainerRuntime, DockerClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DockerClient::new("http://127.0.0.1:2375".to_string())?;
//!
//! // Every container, running or not
//! let containers = client.list_containers(true).await?;
//! for container in &containers {
//!     println!("{} {:?}", container.id, container.names);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `test-util`: in-memory [`MockRuntime`] that records every call and can
//!   be told to fail pulls, creates or listings.

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod runtime_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::DockerClient;
pub use common::HttpClient;
pub use error::RuntimeError;
pub use models::*;
pub use runtime_trait::{CommandRunner, ContainerRuntime, ImagePuller};
#[cfg(feature = "test-util")]
pub use mock::{MockContainer, MockRuntime, RuntimeCall};
