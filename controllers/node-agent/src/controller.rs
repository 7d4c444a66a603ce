//! Process wiring.
//!
//! The `Controller` builds the runtime client, event sink, stats provider and
//! health checker, then spawns the config sources, the sync loop and the node
//! HTTP server. It runs until the first of those tasks exits.

use crate::config::{AgentConfig, EventSinkKind};
use crate::containers::ContainerOps;
use crate::error::AgentError;
use crate::events::{EventSink, KubeEventSink, MemoryEventLog, NoopEventSink};
use crate::health::{HealthChecker, HealthEvaluator, ProbeHealthChecker};
use crate::metrics::AgentMetrics;
use crate::network::NetworkContainerManager;
use crate::node::NodeQueries;
use crate::reconciler::Reconciler;
use crate::server::{self, ServerState};
use crate::sources::{ApiserverSource, FileSource, UPDATE_CHANNEL_CAPACITY};
use crate::stats::{CadvisorClient, StatsProvider};
use crate::sync_loop::{ClusterSync, run_sync_loop};
use crate::volumes::VolumeManager;
use futures::future::select_all;
use kube::Client;
use runtime_client::DockerClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Per-request timeout of liveness probes
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

type AgentTask = (&'static str, JoinHandle<Result<(), AgentError>>);

/// Long-running tasks of one node agent
pub struct Controller {
    tasks: Vec<AgentTask>,
}

impl Controller {
    /// Build every component and spawn the agent's tasks.
    pub async fn new(config: AgentConfig) -> Result<Self, AgentError> {
        info!("Initializing node agent for host {}", config.hostname);

        let docker = Arc::new(DockerClient::new(config.docker_endpoint.clone())?);
        let metrics = Arc::new(AgentMetrics::new()?);

        // The kube client is only needed by the apiserver source and the kube
        // event sink.
        let kube_client = if config.watch_apiserver || config.event_sink == EventSinkKind::Kube {
            Some(Client::try_default().await?)
        } else {
            None
        };

        let mut memory_events = None;
        let events: Arc<dyn EventSink> = match (config.event_sink, &kube_client) {
            (EventSinkKind::Memory, _) => {
                let log = Arc::new(MemoryEventLog::new());
                memory_events = Some(log.clone());
                log
            }
            (EventSinkKind::Kube, Some(client)) => Arc::new(KubeEventSink::new(client.clone(), config.hostname.clone())),
            (EventSinkKind::Kube, None) | (EventSinkKind::None, _) => Arc::new(NoopEventSink),
        };

        let stats: Option<Arc<dyn StatsProvider>> = match &config.cadvisor_url {
            Some(url) => {
                info!("Reading container stats from {}", url);
                Some(Arc::new(CadvisorClient::new(url.clone())?))
            }
            None => {
                info!("No CADVISOR_URL set, stats endpoints will report no data");
                None
            }
        };

        let checker: Arc<dyn HealthChecker> = Arc::new(ProbeHealthChecker::new(docker.clone(), PROBE_TIMEOUT)?);

        let ops = ContainerOps::new(docker.clone(), events, metrics.clone(), config.stop_grace_secs);
        let network = NetworkContainerManager::new(ops.clone(), docker.clone(), config.network_container_image.clone());
        let reconciler = Reconciler::new(
            ops,
            docker.clone(),
            network,
            VolumeManager::new(config.root_dir.clone()),
            HealthEvaluator::new(Some(checker)),
        );
        let cluster_sync = Arc::new(ClusterSync::new(Arc::new(reconciler), metrics.clone()));

        let (updates, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let mut tasks: Vec<AgentTask> = Vec::new();

        if let Some(path) = &config.manifest_path {
            let source = FileSource::new(path.clone(), config.file_check_interval, updates.clone());
            tasks.push(("file source", tokio::spawn(source.run())));
        }
        if config.watch_apiserver {
            match &kube_client {
                Some(client) => {
                    let source = ApiserverSource::new(client.clone(), config.hostname.clone(), updates.clone());
                    tasks.push(("apiserver source", tokio::spawn(source.run())));
                }
                None => return Err(AgentError::InvalidConfig("apiserver watch needs a kube client".to_string())),
            }
        }
        if tasks.is_empty() {
            return Err(AgentError::InvalidConfig(
                "no config source: set MANIFEST_PATH or WATCH_APISERVER".to_string(),
            ));
        }
        // Only the sources hold senders, so the sync loop sees the channel
        // close once they are all gone.
        drop(updates);

        tasks.push((
            "sync loop",
            tokio::spawn(run_sync_loop(updates_rx, cluster_sync, config.resync_interval)),
        ));

        let queries = NodeQueries::new(docker.clone(), docker, stats);
        let router = server::router(ServerState::new(queries, memory_events, metrics), &config.log_dir);
        tasks.push(("node server", tokio::spawn(server::serve(config.listen_addr, router))));

        Ok(Self { tasks })
    }

    /// Run until the first task exits; any exit is an error.
    pub async fn run(self) -> Result<(), AgentError> {
        info!("Node agent running {} tasks", self.tasks.len());
        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();

        let (result, index, remaining) = select_all(handles).await;
        for handle in remaining {
            handle.abort();
        }

        let name = names[index];
        match result {
            Err(e) => Err(AgentError::Watch(format!("{name} panicked: {e}"))),
            Ok(Err(e)) => Err(AgentError::Watch(format!("{name} error: {e}"))),
            Ok(Ok(())) => Err(AgentError::Watch(format!("{name} exited"))),
        }
    }
}
