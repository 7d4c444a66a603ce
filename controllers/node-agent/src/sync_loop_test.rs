use crate::containers::ContainerOps;
use crate::error::AgentError;
use crate::events::NoopEventSink;
use crate::health::HealthEvaluator;
use crate::metrics::AgentMetrics;
use crate::naming::{build_container_name, parse_container_name};
use crate::network::NetworkContainerManager;
use crate::reconciler::Reconciler;
use crate::sync_loop::{ClusterSync, SyncHandler, run_sync_loop};
use crate::volumes::VolumeManager;
use pod_types::{ContainerManifest, ContainerSpec, Pod, PodFullName, PodUpdate, Port, Volume};
use runtime_client::MockRuntime;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn pod(name: &str, containers: &[&str]) -> Pod {
    Pod::new(
        name,
        "default",
        ContainerManifest {
            id: name.into(),
            containers: containers.iter().map(|c| ContainerSpec::new(*c, "busybox")).collect(),
            ..Default::default()
        },
    )
}

fn cluster_sync(runtime: &Arc<MockRuntime>, root: &TempDir) -> (ClusterSync, Arc<AgentMetrics>) {
    let metrics = Arc::new(AgentMetrics::new().unwrap());
    let ops = ContainerOps::new(runtime.clone(), Arc::new(NoopEventSink), metrics.clone(), 10);
    let network = NetworkContainerManager::new(ops.clone(), runtime.clone(), "kubernetes/pause:latest");
    let reconciler = Reconciler::new(
        ops,
        runtime.clone(),
        network,
        VolumeManager::new(root.path()),
        HealthEvaluator::default(),
    );
    (ClusterSync::new(Arc::new(reconciler), metrics.clone()), metrics)
}

async fn pass(sync: &ClusterSync, pods: &[Pod]) {
    for worker in sync.run_pass(pods).await.unwrap() {
        worker.await.unwrap();
    }
}

fn pods_on_node(runtime: &MockRuntime) -> Vec<String> {
    let mut names: Vec<String> = runtime
        .containers()
        .iter()
        .filter_map(|c| parse_container_name(&c.name))
        .map(|p| format!("{}/{}", p.pod_full_name, p.container_name))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_no_desired_pods_kills_every_managed_container() {
    let runtime = Arc::new(MockRuntime::new());
    let root = TempDir::new().unwrap();
    let (sync, metrics) = cluster_sync(&runtime, &root);

    let foreign = runtime.add_container("registry", "registry:2", true);
    for (pod_name, container) in [("web", "net"), ("web", "nginx"), ("db", "net"), ("db", "postgres")] {
        let full_name = PodFullName::new(pod_name, "default");
        runtime.add_container(&build_container_name(&full_name, container, 1), "busybox", true);
    }

    let workers = sync.run_pass(&[]).await.unwrap();
    assert!(workers.is_empty());
    assert_eq!(runtime.removed_ids().len(), 4);
    assert_eq!(runtime.containers().len(), 1);
    assert_eq!(runtime.containers()[0].id, foreign);
    assert_eq!(metrics.containers_killed(), 4);
}

#[tokio::test]
async fn test_pass_converges_and_removes_deleted_pods() {
    let runtime = Arc::new(MockRuntime::new());
    let root = TempDir::new().unwrap();
    let (sync, metrics) = cluster_sync(&runtime, &root);

    pass(&sync, &[pod("web", &["nginx"]), pod("db", &["postgres"])]).await;
    assert_eq!(
        pods_on_node(&runtime),
        vec!["db.default/net", "db.default/postgres", "web.default/net", "web.default/nginx"]
    );
    assert_eq!(metrics.pod_sync_count(true), 2);

    // Nothing to do on an unchanged desired set.
    runtime.clear_calls();
    pass(&sync, &[pod("web", &["nginx"]), pod("db", &["postgres"])]).await;
    assert_eq!(runtime.create_count(), 0);
    assert!(runtime.removed_ids().is_empty());

    pass(&sync, &[pod("web", &["nginx"])]).await;
    assert_eq!(pods_on_node(&runtime), vec!["web.default/net", "web.default/nginx"]);

    // A container dropped from a pod's manifest goes too.
    pass(&sync, &[pod("web", &[])]).await;
    assert_eq!(pods_on_node(&runtime), vec!["web.default/net"]);
}

#[tokio::test]
async fn test_failed_pod_pass_is_counted() {
    let runtime = Arc::new(MockRuntime::new());
    runtime.fail_create_for("kubernetes/pause:latest");
    let root = TempDir::new().unwrap();
    let (sync, metrics) = cluster_sync(&runtime, &root);

    pass(&sync, &[pod("web", &["nginx"])]).await;
    assert_eq!(metrics.pod_sync_count(false), 1);
    assert!(pods_on_node(&runtime).is_empty());
}

#[tokio::test]
async fn test_orphaned_volumes_are_torn_down() {
    let runtime = Arc::new(MockRuntime::new());
    let root = TempDir::new().unwrap();
    let (sync, _) = cluster_sync(&runtime, &root);

    let mut web = pod("web", &["nginx"]);
    web.manifest.volumes = vec![Volume::empty_dir("cache")];
    pass(&sync, &[web.clone(), pod("db", &[])]).await;
    let cache = root.path().join("web/volumes/empty/cache");
    assert!(cache.is_dir());

    let stale = root.path().join("gone/volumes/empty/data");
    std::fs::create_dir_all(&stale).unwrap();
    pass(&sync, &[web.clone()]).await;
    assert!(!stale.exists());
    assert!(cache.is_dir());

    pass(&sync, &[]).await;
    assert!(!cache.exists());
}

#[tokio::test]
async fn test_listing_failure_aborts_pass() {
    let runtime = Arc::new(MockRuntime::new());
    let root = TempDir::new().unwrap();
    let (sync, _) = cluster_sync(&runtime, &root);

    runtime.fail_list(true);
    let err = sync.run_pass(&[pod("web", &["nginx"])]).await.unwrap_err();
    assert!(matches!(err, AgentError::Runtime(_)));
    assert_eq!(runtime.create_count(), 0);
}

/// Reports the pod names of every pass it is asked to run
struct RecordingHandler {
    passes: mpsc::UnboundedSender<Vec<String>>,
}

#[async_trait::async_trait]
impl SyncHandler for RecordingHandler {
    async fn sync_pods(&self, pods: &[Pod]) -> Result<(), AgentError> {
        let names = pods.iter().map(|p| p.name.clone()).collect();
        let _ = self.passes.send(names);
        Ok(())
    }
}

fn with_host_port(mut pod: Pod, port: u16) -> Pod {
    if let Some(container) = pod.manifest.containers.first_mut() {
        container.ports = vec![Port::new(80).with_host_port(port)];
    }
    pod
}

#[tokio::test(start_paused = true)]
async fn test_sync_loop_events_and_resync() {
    let resync = Duration::from_secs(10);
    let (updates, updates_rx) = mpsc::channel(8);
    let (passes, mut passes_rx) = mpsc::unbounded_channel();
    let sync_loop = tokio::spawn(run_sync_loop(updates_rx, Arc::new(RecordingHandler { passes }), resync));

    // No resync before the first SET.
    tokio::time::sleep(resync * 3).await;
    assert!(passes_rx.try_recv().is_err());

    let started = tokio::time::Instant::now();
    updates
        .send(PodUpdate::set(vec![
            with_host_port(pod("a", &["web"]), 8080),
            with_host_port(pod("b", &["web"]), 8080),
            pod("c", &["web"]),
        ]))
        .await
        .unwrap();
    assert_eq!(passes_rx.recv().await.unwrap(), vec!["a", "c"]);
    assert!(started.elapsed() < resync);

    // UPDATE is accepted and ignored; the next pass is the resync.
    updates.send(PodUpdate::update(vec![pod("d", &[])])).await.unwrap();
    let before_resync = tokio::time::Instant::now();
    assert_eq!(passes_rx.recv().await.unwrap(), vec!["a", "c"]);
    assert!(before_resync.elapsed() >= resync);

    updates.send(PodUpdate::set(Vec::new())).await.unwrap();
    assert!(passes_rx.recv().await.unwrap().is_empty());

    drop(updates);
    let result = sync_loop.await.unwrap();
    assert!(matches!(result, Err(AgentError::Source(_))));
}
