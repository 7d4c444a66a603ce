//! Container lifecycle events.
//!
//! Every container the agent starts or kills produces a [`ContainerEvent`].
//! Sinks are best effort: a failed record is logged by the caller and never
//! fails a reconciliation.

use crate::error::AgentError;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::{Api, Client};
use pod_types::{DEFAULT_NAMESPACE, PodFullName};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Events older than this are pruned from [`MemoryEventLog`]
pub const EVENT_RETENTION_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEventKind {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerEvent {
    pub kind: ContainerEventKind,
    pub pod_full_name: PodFullName,
    pub container_name: String,
    pub container_id: String,
    /// Image, known for starts only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ContainerEvent {
    pub fn new(
        kind: ContainerEventKind,
        pod_full_name: PodFullName,
        container_name: impl Into<String>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            pod_full_name,
            container_name: container_name.into(),
            container_id: container_id.into(),
            image: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Destination for container lifecycle events
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: ContainerEvent) -> Result<(), AgentError>;
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

#[async_trait::async_trait]
impl EventSink for NoopEventSink {
    async fn record(&self, event: ContainerEvent) -> Result<(), AgentError> {
        debug!("Dropping {:?} event for {}/{}", event.kind, event.pod_full_name, event.container_name);
        Ok(())
    }
}

/// In-memory event log with a retention window
#[derive(Debug)]
pub struct MemoryEventLog {
    events: Mutex<VecDeque<ContainerEvent>>,
    retention: chrono::Duration,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::with_retention(chrono::Duration::hours(EVENT_RETENTION_HOURS))
    }

    pub fn with_retention(retention: chrono::Duration) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    /// Retained events, oldest first
    pub fn events(&self) -> Vec<ContainerEvent> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ContainerEvent>> {
        // A poisoned log is still a valid log.
        self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn prune(events: &mut VecDeque<ContainerEvent>, cutoff: DateTime<Utc>) {
        while events.front().is_some_and(|e| e.timestamp < cutoff) {
            events.pop_front();
        }
    }
}

#[async_trait::async_trait]
impl EventSink for MemoryEventLog {
    async fn record(&self, event: ContainerEvent) -> Result<(), AgentError> {
        let cutoff = Utc::now() - self.retention;
        let mut events = self.lock();
        Self::prune(&mut events, cutoff);
        if event.timestamp >= cutoff {
            events.push_back(event);
        }
        Ok(())
    }
}

/// Posts core/v1 Events for the pod that owns the container
#[derive(Clone)]
pub struct KubeEventSink {
    client: Client,
    hostname: String,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").field("hostname", &self.hostname).finish_non_exhaustive()
    }
}

impl KubeEventSink {
    pub fn new(client: Client, hostname: String) -> Self {
        Self { client, hostname }
    }
}

/// Split `<name>.<namespace>`; namespaces never contain dots
fn split_full_name(full_name: &PodFullName) -> (&str, &str) {
    full_name
        .as_str()
        .rsplit_once('.')
        .unwrap_or((full_name.as_str(), DEFAULT_NAMESPACE))
}

fn to_kube_event(event: &ContainerEvent, hostname: &str) -> (String, Event) {
    let (name, namespace) = split_full_name(&event.pod_full_name);
    let (reason, message) = match event.kind {
        ContainerEventKind::Start => (
            "Started",
            format!(
                "Started container {} ({}) with image {}",
                event.container_name,
                event.container_id,
                event.image.as_deref().unwrap_or("<unknown>")
            ),
        ),
        ContainerEventKind::Stop => (
            "Killing",
            format!("Stopped container {} ({})", event.container_name, event.container_id),
        ),
    };
    let kube_event = Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{name}.")),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            kind: Some("Pod".to_string()),
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            field_path: Some(format!("spec.containers{{{}}}", event.container_name)),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        message: Some(message),
        type_: Some("Normal".to_string()),
        source: Some(EventSource {
            component: Some("kubelet".to_string()),
            host: Some(hostname.to_string()),
        }),
        count: Some(1),
        ..Default::default()
    };
    (namespace.to_string(), kube_event)
}

#[async_trait::async_trait]
impl EventSink for KubeEventSink {
    async fn record(&self, event: ContainerEvent) -> Result<(), AgentError> {
        let (namespace, kube_event) = to_kube_event(&event, &self.hostname);
        let api: Api<Event> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), &kube_event)
            .await
            .map_err(|e| AgentError::Events(format!("posting event for {}: {}", event.pod_full_name, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: ContainerEventKind) -> ContainerEvent {
        ContainerEvent::new(kind, PodFullName::new("web", "prod"), "nginx", "abc123")
    }

    #[tokio::test]
    async fn test_memory_log_prunes_old_events() {
        let log = MemoryEventLog::new();
        let mut old = event(ContainerEventKind::Start);
        old.timestamp = Utc::now() - chrono::Duration::hours(49);
        log.record(old).await.unwrap();
        assert!(log.events().is_empty());

        let mut recent = event(ContainerEventKind::Start);
        recent.timestamp = Utc::now() - chrono::Duration::hours(47);
        log.record(recent.clone()).await.unwrap();
        log.record(event(ContainerEventKind::Stop)).await.unwrap();
        assert_eq!(log.events().len(), 2);
        assert_eq!(log.events()[0], recent);
    }

    #[tokio::test]
    async fn test_custom_retention_window() {
        let log = MemoryEventLog::with_retention(chrono::Duration::seconds(5));
        let mut stale = event(ContainerEventKind::Stop);
        stale.timestamp = Utc::now() - chrono::Duration::seconds(10);
        log.record(stale).await.unwrap();
        log.record(event(ContainerEventKind::Start)).await.unwrap();
        let events = log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ContainerEventKind::Start);
    }

    #[test]
    fn test_kube_event_shape() {
        let (namespace, kube_event) =
            to_kube_event(&event(ContainerEventKind::Start).with_image("nginx:1.25"), "node-1");
        assert_eq!(namespace, "prod");
        assert_eq!(kube_event.involved_object.name.as_deref(), Some("web"));
        assert_eq!(kube_event.reason.as_deref(), Some("Started"));
        assert!(kube_event.message.unwrap().contains("nginx:1.25"));
        assert_eq!(kube_event.source.unwrap().host.as_deref(), Some("node-1"));
    }

    #[test]
    fn test_split_full_name() {
        assert_eq!(split_full_name(&PodFullName::new("a.b", "ns")), ("a.b", "ns"));
        assert_eq!(split_full_name(&PodFullName::from_raw("plain")), ("plain", "default"));
    }
}
