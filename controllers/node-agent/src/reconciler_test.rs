use crate::containers::{ContainerOps, list_managed_containers};
use crate::error::AgentError;
use crate::events::NoopEventSink;
use crate::fingerprint::fingerprint;
use crate::health::{HealthChecker, HealthEvaluator, HealthStatus};
use crate::metrics::AgentMetrics;
use crate::naming::{build_container_name, parse_container_name};
use crate::network::{NETWORK_CONTAINER_NAME, NetworkContainerManager};
use crate::reconciler::Reconciler;
use crate::volumes::VolumeManager;
use pod_types::{
    ContainerManifest, ContainerSpec, LivenessProbe, Pod, PodFullName, PodState, ProbeHandler, RestartPolicy, Volume,
};
use runtime_client::{MockContainer, MockRuntime, RuntimeCall};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const PAUSE: &str = "kubernetes/pause:latest";

/// Answers every check with the same status, or errors when `None`
struct FixedChecker(Option<HealthStatus>);

#[async_trait::async_trait]
impl HealthChecker for FixedChecker {
    async fn check(
        &self,
        _pod_full_name: &PodFullName,
        _pod_state: &PodState,
        _spec: &ContainerSpec,
        _container_id: &str,
    ) -> Result<HealthStatus, AgentError> {
        self.0
            .ok_or_else(|| AgentError::HealthCheck("probe target unreachable".to_string()))
    }
}

struct Harness {
    runtime: Arc<MockRuntime>,
    metrics: Arc<AgentMetrics>,
    reconciler: Reconciler,
    _root: TempDir,
}

impl Harness {
    fn new(checker: Option<Arc<dyn HealthChecker>>) -> Self {
        let root = TempDir::new().unwrap();
        let volume_root = root.path().to_path_buf();
        Self::with_root(checker, &volume_root, root)
    }

    fn with_root(checker: Option<Arc<dyn HealthChecker>>, volume_root: &Path, root: TempDir) -> Self {
        let runtime = Arc::new(MockRuntime::new());
        let metrics = Arc::new(AgentMetrics::new().unwrap());
        let ops = ContainerOps::new(runtime.clone(), Arc::new(NoopEventSink), metrics.clone(), 10);
        let network = NetworkContainerManager::new(ops.clone(), runtime.clone(), PAUSE);
        let reconciler = Reconciler::new(
            ops,
            runtime.clone(),
            network,
            VolumeManager::new(volume_root),
            HealthEvaluator::new(checker),
        );
        Self {
            runtime,
            metrics,
            reconciler,
            _root: root,
        }
    }

    async fn sync(&self, pod: &Pod) -> Result<(), AgentError> {
        let containers = list_managed_containers(self.runtime.as_ref()).await.unwrap();
        self.reconciler.sync_pod(pod, &containers).await
    }

    /// Live containers of the `web` pod named `container_name`
    fn named(&self, container_name: &str) -> Vec<MockContainer> {
        self.runtime
            .containers()
            .into_iter()
            .filter(|c| {
                parse_container_name(&c.name).is_some_and(|p| {
                    p.pod_full_name == PodFullName::new("web", "default") && p.container_name == container_name
                })
            })
            .collect()
    }

    fn only(&self, container_name: &str) -> MockContainer {
        let mut found = self.named(container_name);
        assert_eq!(found.len(), 1, "expected exactly one {container_name}");
        found.remove(0)
    }
}

fn web_pod(containers: Vec<ContainerSpec>) -> Pod {
    Pod::new(
        "web",
        "default",
        ContainerManifest {
            id: "web".into(),
            containers,
            ..Default::default()
        },
    )
}

fn probed(name: &str, image: &str) -> ContainerSpec {
    let mut spec = ContainerSpec::new(name, image);
    spec.liveness_probe = Some(LivenessProbe {
        initial_delay_seconds: 0,
        handler: ProbeHandler::HttpGet {
            path: "/healthz".into(),
            port: 8080,
            host: None,
        },
    });
    spec
}

#[tokio::test]
async fn test_fresh_pod_and_idempotence() {
    let h = Harness::new(None);
    let pod = web_pod(vec![ContainerSpec::new("nginx", "nginx"), ContainerSpec::new("sidecar", "busybox")]);

    h.sync(&pod).await.unwrap();
    let net = h.only(NETWORK_CONTAINER_NAME);
    assert!(net.running);
    assert!(net.config.host_config.network_mode.is_none());
    assert_eq!(net.config.hostname, "web");

    let nginx = h.only("nginx");
    assert!(nginx.running);
    assert_eq!(
        nginx.config.host_config.network_mode.as_deref(),
        Some(format!("container:{}", net.id).as_str())
    );
    assert_eq!(parse_container_name(&nginx.name).unwrap().fingerprint, fingerprint(&pod.manifest.containers[0]));
    h.only("sidecar");
    assert!(h.runtime.pulled_images().contains("nginx"));

    h.runtime.clear_calls();
    h.sync(&pod).await.unwrap();
    assert_eq!(h.runtime.create_count(), 0);
    assert!(h.runtime.removed_ids().is_empty());
}

#[tokio::test]
async fn test_changed_spec_replaces_only_that_container() {
    let h = Harness::new(None);
    let pod = web_pod(vec![ContainerSpec::new("nginx", "nginx:1.0"), ContainerSpec::new("sidecar", "busybox")]);
    h.sync(&pod).await.unwrap();
    let old = h.only("nginx");
    let net = h.only(NETWORK_CONTAINER_NAME);

    let pod = web_pod(vec![ContainerSpec::new("nginx", "nginx:1.1"), ContainerSpec::new("sidecar", "busybox")]);
    h.runtime.clear_calls();
    h.sync(&pod).await.unwrap();

    assert_eq!(h.runtime.removed_ids(), vec![old.id]);
    assert_eq!(h.runtime.create_count(), 1);
    assert_eq!(h.only("nginx").image, "nginx:1.1");
    assert_eq!(h.only(NETWORK_CONTAINER_NAME).id, net.id);
}

#[tokio::test]
async fn test_stopped_container_and_restart_policy() {
    let h = Harness::new(None);
    let mut never = ContainerSpec::new("job", "busybox");
    never.restart_policy = RestartPolicy::Never;
    let always = ContainerSpec::new("server", "nginx");
    let pod = web_pod(vec![never, always]);
    h.sync(&pod).await.unwrap();

    let job = h.only("job");
    let server = h.only("server");
    h.runtime.set_running(&job.id, false);
    h.runtime.set_exit_code(&job.id, 1);
    h.runtime.set_running(&server.id, false);

    h.runtime.clear_calls();
    h.sync(&pod).await.unwrap();

    // Never leaves the failed job alone; Always restarts the server.
    assert_eq!(h.only("job").id, job.id);
    assert_eq!(h.runtime.removed_ids(), vec![server.id.clone()]);
    assert_ne!(h.only("server").id, server.id);
}

#[tokio::test]
async fn test_on_failure_keeps_clean_exit_only() {
    let h = Harness::new(None);
    let mut spec = ContainerSpec::new("batch", "busybox");
    spec.restart_policy = RestartPolicy::OnFailure;
    let pod = web_pod(vec![spec]);
    h.sync(&pod).await.unwrap();

    let first = h.only("batch");
    h.runtime.set_running(&first.id, false);
    h.sync(&pod).await.unwrap();
    assert_eq!(h.only("batch").id, first.id);

    h.runtime.set_exit_code(&first.id, 2);
    h.sync(&pod).await.unwrap();
    let second = h.only("batch");
    assert_ne!(second.id, first.id);
    assert!(second.running);
}

#[tokio::test]
async fn test_unhealthy_container_is_recreated() {
    let h = Harness::new(Some(Arc::new(FixedChecker(Some(HealthStatus::Unhealthy)))));
    let pod = web_pod(vec![probed("api", "api:1")]);
    h.sync(&pod).await.unwrap();
    let first = h.only("api");

    h.sync(&pod).await.unwrap();
    assert_ne!(h.only("api").id, first.id);
    assert!(h.runtime.removed_ids().contains(&first.id));
}

#[tokio::test]
async fn test_indeterminate_health_keeps_container() {
    for checker in [FixedChecker(None), FixedChecker(Some(HealthStatus::Unknown))] {
        let h = Harness::new(Some(Arc::new(checker)));
        let pod = web_pod(vec![probed("api", "api:1")]);
        h.sync(&pod).await.unwrap();
        let first = h.only("api");

        h.sync(&pod).await.unwrap();
        assert_eq!(h.only("api").id, first.id);
    }
}

#[tokio::test]
async fn test_probe_grace_period_skips_checker() {
    let h = Harness::new(Some(Arc::new(FixedChecker(Some(HealthStatus::Unhealthy)))));
    let mut spec = probed("api", "api:1");
    if let Some(probe) = spec.liveness_probe.as_mut() {
        probe.initial_delay_seconds = 3600;
    }
    let pod = web_pod(vec![spec]);
    h.sync(&pod).await.unwrap();
    let first = h.only("api");

    h.sync(&pod).await.unwrap();
    assert_eq!(h.only("api").id, first.id);
}

#[tokio::test]
async fn test_uninspectable_container_is_swept() {
    let h = Harness::new(None);
    let pod = web_pod(vec![ContainerSpec::new("nginx", "nginx")]);
    h.sync(&pod).await.unwrap();
    let first = h.only("nginx");

    h.runtime.fail_inspect(true);
    h.runtime.clear_calls();
    h.sync(&pod).await.unwrap();
    assert_eq!(h.runtime.removed_ids(), vec![first.id.clone()]);
    assert_eq!(h.runtime.create_count(), 0);
    assert!(h.named("nginx").is_empty());

    // Recreated once the runtime answers again.
    h.runtime.fail_inspect(false);
    h.sync(&pod).await.unwrap();
    assert_ne!(h.only("nginx").id, first.id);
}

#[tokio::test]
async fn test_missing_network_container_restarts_pod() {
    let h = Harness::new(None);
    let spec = ContainerSpec::new("nginx", "nginx");
    let full_name = PodFullName::new("web", "default");
    let orphan = h
        .runtime
        .add_container(&build_container_name(&full_name, "nginx", fingerprint(&spec)), "nginx", true);

    h.sync(&web_pod(vec![spec])).await.unwrap();

    assert_eq!(h.runtime.removed_ids(), vec![orphan.clone()]);
    h.only(NETWORK_CONTAINER_NAME);
    assert_ne!(h.only("nginx").id, orphan);
}

#[tokio::test]
async fn test_pull_failure_skips_container() {
    let h = Harness::new(None);
    h.runtime.fail_pull_for("private/app");
    let pod = web_pod(vec![ContainerSpec::new("app", "private/app"), ContainerSpec::new("nginx", "nginx")]);

    h.sync(&pod).await.unwrap();

    assert!(h.named("app").is_empty());
    h.only("nginx");
    assert!(
        !h.runtime
            .calls()
            .iter()
            .any(|c| matches!(c, RuntimeCall::Create { image, .. } if image == "private/app"))
    );
    assert!(h.metrics.render().unwrap().contains("podlet_image_pull_failures_total 1"));
}

#[tokio::test]
async fn test_create_failure_does_not_fail_pass() {
    let h = Harness::new(None);
    h.runtime.fail_create_for("broken");
    let pod = web_pod(vec![ContainerSpec::new("broken", "broken"), ContainerSpec::new("nginx", "nginx")]);

    h.sync(&pod).await.unwrap();
    assert!(h.named("broken").is_empty());
    h.only("nginx");
}

#[tokio::test]
async fn test_volume_failure_aborts_pass() {
    let root = TempDir::new().unwrap();
    // A regular file where the volume root should be: nothing can be created under it.
    let blocker = root.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let h = Harness::with_root(None, &blocker, root);

    let mut pod = web_pod(vec![ContainerSpec::new("nginx", "nginx")]);
    pod.manifest.volumes = vec![Volume::empty_dir("scratch")];

    let err = h.sync(&pod).await.unwrap_err();
    assert!(matches!(err, AgentError::Volume(_)));
    // The network container came first; nothing after the volumes ran.
    assert_eq!(h.runtime.create_count(), 1);
    assert!(h.named("nginx").is_empty());
}

#[tokio::test]
async fn test_duplicates_and_strays_are_swept() {
    let h = Harness::new(None);
    let spec = ContainerSpec::new("nginx", "nginx");
    let pod = web_pod(vec![spec.clone()]);
    h.sync(&pod).await.unwrap();
    let kept = h.only("nginx");

    let full_name = pod.full_name();
    let duplicate = h
        .runtime
        .add_container(&build_container_name(&full_name, "nginx", fingerprint(&spec)), "nginx", true);
    let stray = h
        .runtime
        .add_container(&build_container_name(&full_name, "removed", 9), "busybox", true);
    let other_pod = h.runtime.add_container(
        &build_container_name(&PodFullName::new("db", "default"), "postgres", 9),
        "postgres",
        true,
    );

    h.runtime.clear_calls();
    h.sync(&pod).await.unwrap();

    let mut removed = h.runtime.removed_ids();
    removed.sort();
    assert_eq!(removed, vec![duplicate, stray]);
    assert_eq!(h.only("nginx").id, kept.id);
    assert!(h.runtime.container(&other_pod).is_some());
    assert_eq!(h.runtime.create_count(), 0);
}

#[tokio::test]
async fn test_name_without_fingerprint_matches_any_spec() {
    let h = Harness::new(None);
    let full_name = PodFullName::new("web", "default");
    h.runtime
        .add_container(&build_container_name(&full_name, NETWORK_CONTAINER_NAME, 0), PAUSE, true);
    let legacy = h
        .runtime
        .add_container(&build_container_name(&full_name, "nginx", 0), "nginx:old", true);

    h.sync(&web_pod(vec![ContainerSpec::new("nginx", "nginx:new")])).await.unwrap();

    assert_eq!(h.only("nginx").id, legacy);
    assert_eq!(h.runtime.create_count(), 0);
}

#[tokio::test]
async fn test_kill_failure_skips_replacement() {
    let h = Harness::new(None);
    h.sync(&web_pod(vec![ContainerSpec::new("nginx", "nginx:1.0")])).await.unwrap();
    let old = h.only("nginx");
    h.runtime.fail_remove_for(&old.id);

    h.runtime.clear_calls();
    h.sync(&web_pod(vec![ContainerSpec::new("nginx", "nginx:1.1")])).await.unwrap();

    assert_eq!(h.runtime.create_count(), 0);
    assert_eq!(h.only("nginx").id, old.id);
}
