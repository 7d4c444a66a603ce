//! Resource statistics from the node's metrics service.
//!
//! Paths are cgroup-style: `/` is the whole machine, `/docker/<id>` one
//! container.

use crate::error::AgentError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// What to include in a container stats answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfoRequest {
    /// Number of most recent samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_stats: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpu_usage_percentiles: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory_usage_percentiles: Vec<u32>,
}

/// Source of container and machine statistics
#[async_trait::async_trait]
pub trait StatsProvider: Send + Sync {
    async fn container_info(&self, path: &str, request: &ContainerInfoRequest)
    -> Result<serde_json::Value, AgentError>;

    async fn machine_info(&self) -> Result<serde_json::Value, AgentError>;
}

/// cAdvisor v1.3 API client
#[derive(Debug, Clone)]
pub struct CadvisorClient {
    client: Client,
    base_url: String,
}

impl CadvisorClient {
    pub fn new(base_url: String) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::Stats(format!("building cadvisor client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn read_json(&self, response: reqwest::Response, url: &str) -> Result<serde_json::Value, AgentError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Stats(format!("{} answered {}: {}", url, status, body.trim())));
        }
        response
            .json()
            .await
            .map_err(|e| AgentError::Stats(format!("decoding {url}: {e}")))
    }
}

#[async_trait::async_trait]
impl StatsProvider for CadvisorClient {
    async fn container_info(
        &self,
        path: &str,
        request: &ContainerInfoRequest,
    ) -> Result<serde_json::Value, AgentError> {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
        let url = format!("{}/api/v1.3/containers{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Stats(format!("POST {url}: {e}")))?;
        self.read_json(response, &url).await
    }

    async fn machine_info(&self) -> Result<serde_json::Value, AgentError> {
        let url = format!("{}/api/v1.3/machine", self.base_url);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::Stats(format!("GET {url}: {e}")))?;
        self.read_json(response, &url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn spawn_fake_cadvisor() -> String {
        let app = Router::new()
            .route(
                "/api/v1.3/containers/{*path}",
                post(|Path(path): Path<String>, Json(req): Json<ContainerInfoRequest>| async move {
                    Json(serde_json::json!({ "name": format!("/{path}"), "samples": req.num_stats }))
                }),
            )
            .route(
                "/api/v1.3/containers/",
                post(|| async { Json(serde_json::json!({ "name": "/" })) }),
            )
            .route("/api/v1.3/machine", get(|| async { Json(serde_json::json!({ "num_cores": 4 })) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_container_and_machine_info() {
        let client = CadvisorClient::new(spawn_fake_cadvisor().await).unwrap();
        let request = ContainerInfoRequest { num_stats: Some(5), ..Default::default() };

        let info = client.container_info("/docker/abc", &request).await.unwrap();
        assert_eq!(info["name"], "/docker/abc");
        assert_eq!(info["samples"], 5);

        let root = client.container_info("/", &request).await.unwrap();
        assert_eq!(root["name"], "/");

        let machine = client.machine_info().await.unwrap();
        assert_eq!(machine["num_cores"], 4);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let client = CadvisorClient::new("http://127.0.0.1:1".to_string()).unwrap();
        assert!(matches!(client.machine_info().await, Err(AgentError::Stats(_))));
    }
}
