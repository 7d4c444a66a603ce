//! Container health.
//!
//! [`HealthEvaluator`] decides whether a container the reconciler found is
//! still fit to keep; [`ProbeHealthChecker`] runs liveness probes for it.

use crate::containers::RuntimeContainer;
use crate::error::AgentError;
use pod_types::{ContainerSpec, PodFullName, PodState, ProbeHandler};
use runtime_client::{CommandRunner, ContainerDetails};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Outcome of a health evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// The checker could not tell
    Unknown,
}

/// Runs a container's liveness probe
#[async_trait::async_trait]
pub trait HealthChecker: Send + Sync {
    /// `container_id` is the runtime id of the container `spec` describes.
    async fn check(
        &self,
        pod_full_name: &PodFullName,
        pod_state: &PodState,
        spec: &ContainerSpec,
        container_id: &str,
    ) -> Result<HealthStatus, AgentError>;
}

/// Combines the probe grace period, the probe and the runtime state
#[derive(Clone, Default)]
pub struct HealthEvaluator {
    checker: Option<Arc<dyn HealthChecker>>,
}

impl std::fmt::Debug for HealthEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthEvaluator")
            .field("checker", &self.checker.is_some())
            .finish()
    }
}

impl HealthEvaluator {
    pub fn new(checker: Option<Arc<dyn HealthChecker>>) -> Self {
        Self { checker }
    }

    /// Health of `container`, inspected as `details`.
    ///
    /// - no probe: healthy iff running
    /// - probe, within `initialDelaySeconds` of creation: healthy
    /// - probe, no checker: healthy
    /// - otherwise whatever the checker says; its errors are returned
    pub async fn evaluate(
        &self,
        pod_full_name: &PodFullName,
        pod_state: &PodState,
        spec: &ContainerSpec,
        container: &RuntimeContainer,
        details: &ContainerDetails,
    ) -> Result<HealthStatus, AgentError> {
        let Some(probe) = &spec.liveness_probe else {
            return Ok(if details.state.running {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            });
        };

        let age = chrono::Utc::now().timestamp() - container.created;
        if age < probe.initial_delay_seconds {
            debug!(
                "Pod {} container {} is {}s old, inside its {}s grace period",
                pod_full_name, spec.name, age, probe.initial_delay_seconds
            );
            return Ok(HealthStatus::Healthy);
        }

        match &self.checker {
            None => Ok(HealthStatus::Healthy),
            Some(checker) => checker.check(pod_full_name, pod_state, spec, &container.id).await,
        }
    }
}

/// Liveness probes over HTTP, TCP and exec
pub struct ProbeHealthChecker {
    http: reqwest::Client,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl std::fmt::Debug for ProbeHealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeHealthChecker")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProbeHealthChecker {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Result<Self, AgentError> {
        // 3xx counts as healthy, so redirects must not be followed.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AgentError::HealthCheck(format!("building probe client: {e}")))?;
        Ok(Self { http, runner, timeout })
    }

    fn probe_host<'a>(host: Option<&'a str>, pod_state: &'a PodState) -> Result<&'a str, AgentError> {
        host.or(pod_state.pod_ip.as_deref())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AgentError::HealthCheck("no probe host and no pod IP".to_string()))
    }

    async fn check_http(&self, host: &str, port: u16, path: &str) -> HealthStatus {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
        let url = format!("http://{host}:{port}{path}");
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                HealthStatus::Healthy
            }
            Ok(response) => {
                debug!("Probe {} answered {}", url, response.status());
                HealthStatus::Unhealthy
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
                HealthStatus::Unhealthy
            }
        }
    }

    async fn check_tcp(&self, host: &str, port: u16) -> HealthStatus {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => HealthStatus::Healthy,
            Ok(Err(e)) => {
                debug!("TCP probe {}:{} failed: {}", host, port, e);
                HealthStatus::Unhealthy
            }
            Err(_) => {
                debug!("TCP probe {}:{} timed out", host, port);
                HealthStatus::Unhealthy
            }
        }
    }
}

#[async_trait::async_trait]
impl HealthChecker for ProbeHealthChecker {
    async fn check(
        &self,
        pod_full_name: &PodFullName,
        pod_state: &PodState,
        spec: &ContainerSpec,
        container_id: &str,
    ) -> Result<HealthStatus, AgentError> {
        let Some(probe) = &spec.liveness_probe else {
            return Ok(HealthStatus::Healthy);
        };
        match &probe.handler {
            ProbeHandler::HttpGet { path, port, host } => {
                let host = Self::probe_host(host.as_deref(), pod_state)?;
                Ok(self.check_http(host, *port, path).await)
            }
            ProbeHandler::TcpSocket { port, host } => {
                let host = Self::probe_host(host.as_deref(), pod_state)?;
                Ok(self.check_tcp(host, *port).await)
            }
            ProbeHandler::Exec { command } => {
                let output = self.runner.run_in_container(container_id, command).await.map_err(|e| {
                    AgentError::HealthCheck(format!(
                        "exec probe in pod {} container {}: {}",
                        pod_full_name, spec.name, e
                    ))
                })?;
                Ok(match output.exit_code {
                    Some(0) => HealthStatus::Healthy,
                    Some(_) => HealthStatus::Unhealthy,
                    None => HealthStatus::Unknown,
                })
            }
        }
    }
}
