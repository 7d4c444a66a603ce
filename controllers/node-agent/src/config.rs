//! Agent configuration from environment variables.

use crate::error::AgentError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where container lifecycle events go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSinkKind {
    /// Kept in memory and served at `/events`
    Memory,
    /// Posted to the apiserver as core/v1 Events
    Kube,
    /// Dropped
    None,
}

impl FromStr for EventSinkKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "kube" | "kubernetes" => Ok(Self::Kube),
            "none" | "" => Ok(Self::None),
            other => Err(AgentError::InvalidConfig(format!(
                "EVENT_SINK must be memory, kube or none, got {other:?}"
            ))),
        }
    }
}

/// Runtime configuration of the node agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub hostname: String,
    pub docker_endpoint: String,
    /// Volume root; empty-dir volumes live under `<root>/<pod>/volumes/empty`
    pub root_dir: PathBuf,
    /// Served read-only under `/logs/`
    pub log_dir: PathBuf,
    pub resync_interval: Duration,
    pub manifest_path: Option<PathBuf>,
    pub file_check_interval: Duration,
    pub watch_apiserver: bool,
    pub cadvisor_url: Option<String>,
    pub listen_addr: SocketAddr,
    pub network_container_image: String,
    pub stop_grace_secs: u32,
    pub event_sink: EventSinkKind,
}

impl AgentConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let hostname = get("NODE_HOSTNAME")
            .or_else(|| get("HOSTNAME"))
            .unwrap_or_else(|| "localhost".to_string());

        let listen_addr = get("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:10250".to_string());
        let listen_addr = listen_addr
            .parse()
            .map_err(|e| AgentError::InvalidConfig(format!("LISTEN_ADDR {listen_addr:?}: {e}")))?;

        Ok(Self {
            hostname,
            docker_endpoint: get("DOCKER_ENDPOINT").unwrap_or_else(|| "http://127.0.0.1:2375".to_string()),
            root_dir: PathBuf::from(get("ROOT_DIR").unwrap_or_else(|| "/var/lib/kubelet".to_string())),
            log_dir: PathBuf::from(get("LOG_DIR").unwrap_or_else(|| "/var/log".to_string())),
            resync_interval: Duration::from_secs(parse_number(&get, "RESYNC_INTERVAL_SECS", 10)?),
            manifest_path: get("MANIFEST_PATH").map(PathBuf::from),
            file_check_interval: Duration::from_secs(parse_number(&get, "FILE_CHECK_INTERVAL_SECS", 20)?),
            watch_apiserver: parse_bool(&get, "WATCH_APISERVER", false)?,
            cadvisor_url: get("CADVISOR_URL"),
            listen_addr,
            network_container_image: get("NETWORK_CONTAINER_IMAGE")
                .unwrap_or_else(|| "kubernetes/pause:latest".to_string()),
            stop_grace_secs: parse_number(&get, "STOP_GRACE_SECS", 10)?,
            event_sink: get("EVENT_SINK").map_or(Ok(EventSinkKind::Memory), |v| v.parse())?,
        })
    }
}

fn parse_number<T, G>(get: &G, key: &str, default: T) -> Result<T, AgentError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AgentError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool, AgentError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(AgentError::InvalidConfig(format!("{key}={v:?} is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.docker_endpoint, "http://127.0.0.1:2375");
        assert_eq!(config.root_dir, PathBuf::from("/var/lib/kubelet"));
        assert_eq!(config.resync_interval, Duration::from_secs(10));
        assert_eq!(config.file_check_interval, Duration::from_secs(20));
        assert!(!config.watch_apiserver);
        assert!(config.manifest_path.is_none());
        assert!(config.cadvisor_url.is_none());
        assert_eq!(config.listen_addr.port(), 10250);
        assert_eq!(config.network_container_image, "kubernetes/pause:latest");
        assert_eq!(config.stop_grace_secs, 10);
        assert_eq!(config.event_sink, EventSinkKind::Memory);
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("HOSTNAME", "fallback"),
            ("NODE_HOSTNAME", "node-1"),
            ("RESYNC_INTERVAL_SECS", "3"),
            ("WATCH_APISERVER", "true"),
            ("MANIFEST_PATH", "/etc/kubernetes/manifests"),
            ("EVENT_SINK", "none"),
            ("LISTEN_ADDR", "127.0.0.1:8080"),
        ]))
        .unwrap();
        assert_eq!(config.hostname, "node-1");
        assert_eq!(config.resync_interval, Duration::from_secs(3));
        assert!(config.watch_apiserver);
        assert_eq!(config.manifest_path, Some(PathBuf::from("/etc/kubernetes/manifests")));
        assert_eq!(config.event_sink, EventSinkKind::None);
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_hostname_falls_back_to_hostname_var() {
        let config = AgentConfig::from_lookup(lookup(&[("HOSTNAME", "box")])).unwrap();
        assert_eq!(config.hostname, "box");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for vars in [
            [("RESYNC_INTERVAL_SECS", "ten")],
            [("WATCH_APISERVER", "maybe")],
            [("EVENT_SINK", "syslog")],
            [("LISTEN_ADDR", "nowhere")],
            [("STOP_GRACE_SECS", "-1")],
        ] {
            let err = AgentConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, AgentError::InvalidConfig(_)), "{vars:?} gave {err}");
        }
    }
}
