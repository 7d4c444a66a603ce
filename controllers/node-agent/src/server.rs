//! Node HTTP server: pod status, stats, remote exec, logs, events and
//! metrics.

use crate::error::AgentError;
use crate::events::MemoryEventLog;
use crate::metrics::AgentMetrics;
use crate::node::NodeQueries;
use crate::stats::ContainerInfoRequest;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pod_types::{DEFAULT_NAMESPACE, PodFullName};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared by every handler
#[derive(Clone)]
pub struct ServerState {
    queries: NodeQueries,
    /// Present when events are kept in memory
    events: Option<Arc<MemoryEventLog>>,
    metrics: Arc<AgentMetrics>,
}

impl ServerState {
    pub fn new(queries: NodeQueries, events: Option<Arc<MemoryEventLog>>, metrics: Arc<AgentMetrics>) -> Self {
        Self {
            queries,
            events,
            metrics,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = match &self {
            AgentError::ContainerNotFound(_) => StatusCode::NOT_FOUND,
            AgentError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

pub fn router(state: ServerState, log_dir: &FsPath) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/podInfo", get(pod_info))
        .route("/stats", get(root_stats))
        .route("/stats/{pod}/{container}", get(container_stats))
        .route("/spec", get(machine_spec))
        .route("/run/{pod}/{container}", post(run_in_container))
        .route("/events", get(events))
        .route("/metrics", get(metrics))
        .nest_service("/logs", ServeDir::new(log_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `addr` until the listener fails
pub async fn serve(addr: SocketAddr, router: Router) -> Result<(), AgentError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Node server listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct PodInfoQuery {
    #[serde(rename = "podID")]
    pod_id: Option<String>,
    #[serde(rename = "podNamespace")]
    pod_namespace: Option<String>,
}

async fn pod_info(State(state): State<ServerState>, Query(query): Query<PodInfoQuery>) -> Response {
    let Some(pod_id) = query.pod_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing podID").into_response();
    };
    let namespace = query.pod_namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    match state.queries.pod_info(&PodFullName::new(&pod_id, &namespace)).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct StatsQuery {
    namespace: Option<String>,
    num_stats: Option<u32>,
}

impl StatsQuery {
    fn request(&self) -> ContainerInfoRequest {
        ContainerInfoRequest {
            num_stats: self.num_stats,
            ..Default::default()
        }
    }
}

fn stats_response(stats: Option<serde_json::Value>) -> Response {
    match stats {
        Some(stats) => Json(stats).into_response(),
        None => (StatusCode::NOT_FOUND, "no stats available").into_response(),
    }
}

async fn root_stats(State(state): State<ServerState>, Query(query): Query<StatsQuery>) -> Response {
    match state.queries.root_stats(&query.request()).await {
        Ok(stats) => stats_response(stats),
        Err(e) => e.into_response(),
    }
}

async fn container_stats(
    State(state): State<ServerState>,
    Path((pod, container)): Path<(String, String)>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let namespace = query.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
    let pod_full_name = PodFullName::new(&pod, namespace);
    match state.queries.container_stats(&pod_full_name, &container, &query.request()).await {
        Ok(stats) => stats_response(stats),
        Err(e) => e.into_response(),
    }
}

async fn machine_spec(State(state): State<ServerState>) -> Response {
    match state.queries.machine_info().await {
        Ok(spec) => stats_response(spec),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    namespace: Option<String>,
    cmd: Option<String>,
}

async fn run_in_container(
    State(state): State<ServerState>,
    Path((pod, container)): Path<(String, String)>,
    Query(query): Query<RunQuery>,
) -> Response {
    let cmd: Vec<String> = query
        .cmd
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if cmd.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing cmd").into_response();
    }
    let namespace = query.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
    let pod_full_name = PodFullName::new(&pod, namespace);
    match state.queries.run_in_container(&pod_full_name, &container, &cmd).await {
        Ok(output) => ([(header::CONTENT_TYPE, "text/plain")], output).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn events(State(state): State<ServerState>) -> Response {
    let events = state.events.as_ref().map(|log| log.events()).unwrap_or_default();
    Json(events).into_response()
}

async fn metrics(State(state): State<ServerState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], body).into_response(),
        Err(e) => e.into_response(),
    }
}
