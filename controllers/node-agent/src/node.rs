//! Read-side queries about pods on this node, and remote exec.

use crate::containers::list_managed_containers;
use crate::error::AgentError;
use crate::stats::{ContainerInfoRequest, StatsProvider};
use chrono::{DateTime, Utc};
use pod_types::PodFullName;
use runtime_client::{CommandRunner, ContainerRuntime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Runtime status of one container of a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub id: String,
    pub image: String,
    pub running: bool,
    pub exit_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub created: DateTime<Utc>,
}

/// Container name → status
pub type PodInfo = BTreeMap<String, ContainerStatus>;

/// Inspect every managed container of `pod_full_name`
pub async fn pod_info(runtime: &dyn ContainerRuntime, pod_full_name: &PodFullName) -> Result<PodInfo, AgentError> {
    let containers = list_managed_containers(runtime).await?;
    let mut info = PodInfo::new();
    for container in containers.pod_containers(pod_full_name) {
        let details = runtime.inspect_container(&container.id).await?;
        info.insert(
            container.container_name.clone(),
            ContainerStatus {
                id: details.id.clone(),
                image: details.config.as_ref().map(|c| c.image.clone()).unwrap_or_default(),
                running: details.state.running,
                exit_code: details.state.exit_code,
                ip: details.ip_address().map(str::to_string),
                created: details.created,
            },
        );
    }
    if info.is_empty() {
        return Err(AgentError::ContainerNotFound(format!("no containers in pod {pod_full_name}")));
    }
    Ok(info)
}

/// Queries served by the node HTTP server
#[derive(Clone)]
pub struct NodeQueries {
    runtime: Arc<dyn ContainerRuntime>,
    runner: Arc<dyn CommandRunner>,
    stats: Option<Arc<dyn StatsProvider>>,
}

impl std::fmt::Debug for NodeQueries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeQueries")
            .field("stats", &self.stats.is_some())
            .finish_non_exhaustive()
    }
}

impl NodeQueries {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        runner: Arc<dyn CommandRunner>,
        stats: Option<Arc<dyn StatsProvider>>,
    ) -> Self {
        Self { runtime, runner, stats }
    }

    pub async fn pod_info(&self, pod_full_name: &PodFullName) -> Result<PodInfo, AgentError> {
        pod_info(self.runtime.as_ref(), pod_full_name).await
    }

    async fn find_container_id(&self, pod_full_name: &PodFullName, container: &str) -> Result<String, AgentError> {
        let containers = list_managed_containers(self.runtime.as_ref()).await?;
        containers
            .find_pod_container(pod_full_name, container)
            .map(|c| c.id.clone())
            .ok_or_else(|| AgentError::ContainerNotFound(format!("{container} in pod {pod_full_name}")))
    }

    /// Run `cmd` in a container of a pod; returns combined output
    pub async fn run_in_container(
        &self,
        pod_full_name: &PodFullName,
        container: &str,
        cmd: &[String],
    ) -> Result<Vec<u8>, AgentError> {
        let id = self.find_container_id(pod_full_name, container).await?;
        let output = self.runner.run_in_container(&id, cmd).await?;
        Ok(output.output)
    }

    /// Stats of one container; `None` without a metrics service
    pub async fn container_stats(
        &self,
        pod_full_name: &PodFullName,
        container: &str,
        request: &ContainerInfoRequest,
    ) -> Result<Option<serde_json::Value>, AgentError> {
        let Some(stats) = &self.stats else {
            return Ok(None);
        };
        let id = self.find_container_id(pod_full_name, container).await?;
        stats.container_info(&format!("/docker/{id}"), request).await.map(Some)
    }

    /// Stats of the whole machine; `None` without a metrics service
    pub async fn root_stats(&self, request: &ContainerInfoRequest) -> Result<Option<serde_json::Value>, AgentError> {
        match &self.stats {
            Some(stats) => stats.container_info("/", request).await.map(Some),
            None => Ok(None),
        }
    }

    /// Machine description; `None` without a metrics service
    pub async fn machine_info(&self) -> Result<Option<serde_json::Value>, AgentError> {
        match &self.stats {
            Some(stats) => stats.machine_info().await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::build_container_name;
    use runtime_client::{ExecOutput, MockRuntime};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStats {
        paths: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl StatsProvider for RecordingStats {
        async fn container_info(
            &self,
            path: &str,
            _request: &ContainerInfoRequest,
        ) -> Result<serde_json::Value, AgentError> {
            self.paths.lock().unwrap().push(path.to_string());
            Ok(serde_json::json!({ "name": path }))
        }

        async fn machine_info(&self) -> Result<serde_json::Value, AgentError> {
            Ok(serde_json::json!({ "num_cores": 2 }))
        }
    }

    fn setup() -> (Arc<MockRuntime>, PodFullName, String) {
        let runtime = Arc::new(MockRuntime::new());
        let pod = PodFullName::new("web", "default");
        runtime.add_container("unmanaged", "busybox", true);
        runtime.add_container(&build_container_name(&pod, "net", 1), "pause", true);
        let id = runtime.add_container(&build_container_name(&pod, "nginx", 2), "nginx", true);
        (runtime, pod, id)
    }

    #[tokio::test]
    async fn test_pod_info() {
        let (runtime, pod, id) = setup();
        let info = pod_info(runtime.as_ref(), &pod).await.unwrap();
        assert_eq!(info.keys().collect::<Vec<_>>(), vec!["net", "nginx"]);
        assert_eq!(info["nginx"].id, id);
        assert!(info["nginx"].running);
        assert!(info["net"].ip.is_some());

        let missing = pod_info(runtime.as_ref(), &PodFullName::new("db", "default")).await;
        assert!(matches!(missing, Err(AgentError::ContainerNotFound(_))));
    }

    #[tokio::test]
    async fn test_run_in_container() {
        let (runtime, pod, id) = setup();
        runtime.set_exec_result(ExecOutput { output: b"hello\n".to_vec(), exit_code: Some(0) });
        let queries = NodeQueries::new(runtime.clone(), runtime.clone(), None);

        let output = queries
            .run_in_container(&pod, "nginx", &["echo".to_string(), "hello".to_string()])
            .await
            .unwrap();
        assert_eq!(output, b"hello\n");
        assert!(runtime.calls().contains(&runtime_client::RuntimeCall::Exec {
            id,
            cmd: vec!["echo".to_string(), "hello".to_string()],
        }));

        let err = queries.run_in_container(&pod, "missing", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::ContainerNotFound(_)));
    }

    #[tokio::test]
    async fn test_stats_paths() {
        let (runtime, pod, id) = setup();
        let request = ContainerInfoRequest::default();

        let without = NodeQueries::new(runtime.clone(), runtime.clone(), None);
        assert!(without.container_stats(&pod, "nginx", &request).await.unwrap().is_none());
        assert!(without.root_stats(&request).await.unwrap().is_none());
        assert!(without.machine_info().await.unwrap().is_none());

        let stats = Arc::new(RecordingStats::default());
        let with = NodeQueries::new(runtime.clone(), runtime.clone(), Some(stats.clone()));
        with.container_stats(&pod, "nginx", &request).await.unwrap().unwrap();
        with.root_stats(&request).await.unwrap().unwrap();
        assert_eq!(*stats.paths.lock().unwrap(), vec![format!("/docker/{id}"), "/".to_string()]);
        assert!(with.container_stats(&pod, "missing", &request).await.is_err());
    }
}
