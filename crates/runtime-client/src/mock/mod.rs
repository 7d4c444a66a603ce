//! Mock runtime for unit testing
//!
//! Implements all runtime traits in memory so the agent's reconciliation can
//! be tested without a Docker daemon. Every call is recorded and pulls,
//! creates, listings, inspects, stops and removes can be told to fail.

use crate::error::RuntimeError;
use crate::models::*;
use crate::runtime_trait::{CommandRunner, ContainerRuntime, ImagePuller};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

/// A call the mock received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    List,
    Create { name: String, image: String },
    Start(String),
    Stop(String),
    Remove(String),
    Inspect(String),
    Pull(String),
    Exec { id: String, cmd: Vec<String> },
}

/// A container held by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContainer {
    pub id: String,
    /// Name without the leading `/`
    pub name: String,
    pub image: String,
    pub created: DateTime<Utc>,
    pub running: bool,
    pub exit_code: i64,
    pub ip: String,
    pub config: ContainerConfig,
}

#[derive(Debug, Default)]
struct Failures {
    pull: HashSet<String>,
    create: HashSet<String>,
    remove: HashSet<String>,
    list: bool,
    inspect: bool,
    stop: bool,
}

/// Mock container runtime for testing
#[derive(Clone, Default)]
pub struct MockRuntime {
    // Keyed by id; ids are allocated in order so iteration is creation order
    containers: Arc<Mutex<BTreeMap<String, MockContainer>>>,
    images: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<RuntimeCall>>>,
    failures: Arc<Mutex<Failures>>,
    exec_result: Arc<Mutex<ExecOutput>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> (String, u64) {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        (format!("mock-{:06}", *next), *next)
    }

    /// Add a container directly (for test setup); returns its id
    pub fn add_container(&self, name: &str, image: &str, running: bool) -> String {
        let (id, n) = self.allocate_id();
        let container = MockContainer {
            id: id.clone(),
            name: name.trim_start_matches('/').to_string(),
            image: image.to_string(),
            created: Utc::now(),
            running,
            exit_code: 0,
            ip: format!("10.0.{}.{}", n / 256, n % 256),
            config: ContainerConfig {
                image: image.to_string(),
                ..Default::default()
            },
        };
        self.containers.lock().unwrap().insert(id.clone(), container);
        id
    }

    /// Snapshot of every container, in creation order
    pub fn containers(&self) -> Vec<MockContainer> {
        self.containers.lock().unwrap().values().cloned().collect()
    }

    pub fn container(&self, id: &str) -> Option<MockContainer> {
        self.containers.lock().unwrap().get(id).cloned()
    }

    /// Containers whose name starts with `prefix`
    pub fn containers_named(&self, prefix: &str) -> Vec<MockContainer> {
        self.containers()
            .into_iter()
            .filter(|c| c.name.starts_with(prefix))
            .collect()
    }

    pub fn set_running(&self, id: &str, running: bool) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.running = running;
        }
    }

    pub fn set_exit_code(&self, id: &str, exit_code: i64) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.exit_code = exit_code;
        }
    }

    pub fn set_created(&self, id: &str, created: DateTime<Utc>) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.created = created;
        }
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Number of create calls received
    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Create { .. }))
            .count()
    }

    /// Ids of containers that received a remove call
    pub fn removed_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Remove(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn pulled_images(&self) -> HashSet<String> {
        self.images.lock().unwrap().clone()
    }

    pub fn fail_pull_for(&self, image: &str) {
        self.failures.lock().unwrap().pull.insert(image.to_string());
    }

    pub fn fail_create_for(&self, image: &str) {
        self.failures.lock().unwrap().create.insert(image.to_string());
    }

    pub fn fail_remove_for(&self, id: &str) {
        self.failures.lock().unwrap().remove.insert(id.to_string());
    }

    pub fn fail_list(&self, fail: bool) {
        self.failures.lock().unwrap().list = fail;
    }

    pub fn fail_inspect(&self, fail: bool) {
        self.failures.lock().unwrap().inspect = fail;
    }

    pub fn fail_stop(&self, fail: bool) {
        self.failures.lock().unwrap().stop = fail;
    }

    /// Result returned by every subsequent exec
    pub fn set_exec_result(&self, result: ExecOutput) {
        *self.exec_result.lock().unwrap() = result;
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.record(RuntimeCall::List);
        if self.failures.lock().unwrap().list {
            return Err(RuntimeError::Api("mock list failure".to_string()));
        }
        Ok(self
            .containers()
            .into_iter()
            .filter(|c| all || c.running)
            .map(|c| ContainerSummary {
                id: c.id,
                names: vec![format!("/{}", c.name)],
                image: c.image,
                created: c.created.timestamp(),
                state: if c.running { "running" } else { "exited" }.to_string(),
            })
            .collect())
    }

    async fn create_container(&self, options: &CreateContainerOptions) -> Result<String, RuntimeError> {
        self.record(RuntimeCall::Create {
            name: options.name.clone(),
            image: options.config.image.clone(),
        });
        if self.failures.lock().unwrap().create.contains(&options.config.image) {
            return Err(RuntimeError::Api(format!("mock create failure for {}", options.config.image)));
        }
        if self.containers().iter().any(|c| c.name == options.name) {
            return Err(RuntimeError::Api(format!("name {} is already in use", options.name)));
        }
        let id = self.add_container(&options.name, &options.config.image, false);
        if let Some(c) = self.containers.lock().unwrap().get_mut(&id) {
            c.config = options.config.clone();
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Start(id.to_string()));
        match self.containers.lock().unwrap().get_mut(id) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!("container {}", id))),
        }
    }

    async fn stop_container(&self, id: &str, _grace_seconds: u32) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Stop(id.to_string()));
        if self.failures.lock().unwrap().stop {
            return Err(RuntimeError::Api("mock stop failure".to_string()));
        }
        match self.containers.lock().unwrap().get_mut(id) {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!("container {}", id))),
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Remove(id.to_string()));
        if self.failures.lock().unwrap().remove.contains(id) {
            return Err(RuntimeError::Api(format!("mock remove failure for {}", id)));
        }
        let mut containers = self.containers.lock().unwrap();
        match containers.get(id) {
            None => Err(RuntimeError::NotFound(format!("container {}", id))),
            Some(c) if c.running && !force => Err(RuntimeError::Api(format!("container {} is running", id))),
            Some(_) => {
                containers.remove(id);
                Ok(())
            }
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        self.record(RuntimeCall::Inspect(id.to_string()));
        if self.failures.lock().unwrap().inspect {
            return Err(RuntimeError::Api("mock inspect failure".to_string()));
        }
        let c = self
            .container(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("container {}", id)))?;
        Ok(ContainerDetails {
            id: c.id,
            name: format!("/{}", c.name),
            created: c.created,
            state: ContainerState {
                running: c.running,
                exit_code: c.exit_code,
                started_at: None,
                finished_at: None,
            },
            network_settings: Some(NetworkSettings { ip_address: c.ip }),
            config: Some(InspectConfig {
                image: c.image,
                hostname: c.config.hostname,
            }),
        })
    }
}

#[async_trait::async_trait]
impl ImagePuller for MockRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Pull(image.to_string()));
        if self.failures.lock().unwrap().pull.contains(image) {
            return Err(RuntimeError::Api(format!("mock pull failure for {}", image)));
        }
        self.images.lock().unwrap().insert(image.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandRunner for MockRuntime {
    async fn run_in_container(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput, RuntimeError> {
        self.record(RuntimeCall::Exec {
            id: container_id.to_string(),
            cmd: cmd.to_vec(),
        });
        match self.container(container_id) {
            Some(c) if c.running => Ok(self.exec_result.lock().unwrap().clone()),
            Some(_) => Err(RuntimeError::Api(format!("container {} is not running", container_id))),
            None => Err(RuntimeError::NotFound(format!("container {}", container_id))),
        }
    }
}
