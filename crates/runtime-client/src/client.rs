//! Docker Engine API client
//!
//! Implements the runtime traits over the Engine HTTP API on a TCP endpoint
//! (e.g. `http://127.0.0.1:2375`).

use crate::common::HttpClient;
use crate::error::RuntimeError;
use crate::models::*;
use crate::runtime_trait::{CommandRunner, ContainerRuntime, ImagePuller};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Docker Engine API client
#[derive(Debug, Clone)]
pub struct DockerClient {
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ExecInspect {
    #[serde(rename = "ExitCode")]
    exit_code: Option<i64>,
}

impl DockerClient {
    /// Create a new Docker client
    ///
    /// # Arguments
    /// * `endpoint` - Engine API base URL (e.g., "http://127.0.0.1:2375")
    pub fn new(endpoint: String) -> Result<Self, RuntimeError> {
        // Image pulls and stops with a grace period can take a while.
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(RuntimeError::Http)?;

        Ok(Self {
            http: HttpClient::new(client, endpoint),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Check that the daemon answers
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.http.send(reqwest::Method::GET, "/_ping", None).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerClient {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let path = self
            .http
            .with_query("/containers/json", &[("all", if all { "1" } else { "0" })]);
        self.http.get(&path).await
    }

    async fn create_container(&self, options: &CreateContainerOptions) -> Result<String, RuntimeError> {
        if options.config.image.is_empty() {
            return Err(RuntimeError::InvalidRequest(format!(
                "container {} has no image",
                options.name
            )));
        }
        let path = self
            .http
            .with_query("/containers/create", &[("name", options.name.as_str())]);
        let body = serde_json::to_value(&options.config)?;
        let response: CreateContainerResponse = self.http.post(&path, &body).await?;
        for warning in response.warnings.unwrap_or_default() {
            warn!("Creating container {}: {}", options.name, warning);
        }
        debug!("Created container {} as {}", options.name, response.id);
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.http
            .post_raw(&format!("/containers/{}/start", id), None)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace_seconds: u32) -> Result<(), RuntimeError> {
        let grace = grace_seconds.to_string();
        let path = self
            .http
            .with_query(&format!("/containers/{}/stop", id), &[("t", grace.as_str())]);
        self.http.post_raw(&path, None).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let path = self.http.with_query(
            &format!("/containers/{}", id),
            &[("force", if force { "true" } else { "false" })],
        );
        self.http.delete(&path).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        self.http.get(&format!("/containers/{}/json", id)).await
    }
}

#[async_trait::async_trait]
impl ImagePuller for DockerClient {
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        if image.is_empty() {
            return Err(RuntimeError::InvalidRequest("empty image reference".to_string()));
        }
        let reference = ImageReference::parse(image);
        let mut params = vec![("fromImage", reference.repository.as_str())];
        if !reference.tag.is_empty() {
            params.push(("tag", reference.tag.as_str()));
        }
        let path = self.http.with_query("/images/create", &params);
        debug!("Pulling image {}", image);

        // The daemon streams progress lines and reports failures in-band
        // after a 200 status.
        let body = self.http.post_raw(&path, None).await?;
        pull_stream_error(&body).map_or(Ok(()), |message| {
            Err(RuntimeError::Api(format!("pull {} failed: {}", image, message)))
        })
    }
}

#[async_trait::async_trait]
impl CommandRunner for DockerClient {
    async fn run_in_container(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError> {
        if cmd.is_empty() {
            return Err(RuntimeError::InvalidRequest("empty command".to_string()));
        }
        let create = serde_json::json!({
            "AttachStdout": true,
            "AttachStderr": true,
            "Tty": true,
            "Cmd": cmd,
        });
        let exec: IdResponse = self
            .http
            .post(&format!("/containers/{}/exec", container_id), &create)
            .await?;

        let start = serde_json::json!({ "Detach": false, "Tty": true });
        let output = self
            .http
            .post_raw(&format!("/exec/{}/start", exec.id), Some(&start))
            .await?;

        let inspect: ExecInspect = self.http.get(&format!("/exec/{}/json", exec.id)).await?;
        Ok(ExecOutput {
            output,
            exit_code: inspect.exit_code,
        })
    }
}

/// First error reported in a pull progress stream
fn pull_stream_error(body: &[u8]) -> Option<String> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .find_map(|event| event.get("error").and_then(|e| e.as_str()).map(str::to_string))
}
