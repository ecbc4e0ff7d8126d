//! devorg server
//!
//! HTTP transport for the organization: submit tasks, inspect agents and
//! browse shared memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devorg_memory::{MemoryEntry, MemoryManager, MemoryQuery, MemoryType};
use devorg_org::{
    AgentStatusReport, Error, OrgConfig, OrgDeps, Organization, Task, TaskContext, TaskResponse,
};

/// Application state shared across handlers
struct AppState {
    org: Organization,
    memory: Option<Arc<MemoryManager>>,
    task_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OrgConfig::from_env()?;
    tracing::info!("Starting devorg server on port {}", config.server_port);
    tracing::info!("Data directory: {:?}", config.memory.data_dir);

    let memory = if config.memory_enabled {
        Some(Arc::new(MemoryManager::open(config.memory.clone()).await?))
    } else {
        None
    };

    let mut deps = OrgDeps::default();
    if let Some(memory) = &memory {
        deps = deps.with_memory(Arc::clone(memory));
    }
    let org = Organization::build(&config.hierarchy, deps)?;
    org.start()?;

    let shutdown = CancellationToken::new();
    let sweeper = memory.as_ref().map(|memory| {
        let interval = Duration::from_secs(config.memory.sweep_interval_secs.max(1));
        memory.spawn_expiry_sweeper(interval, shutdown.child_token())
    });

    let state = Arc::new(AppState {
        org: org.clone(),
        memory: memory.clone(),
        task_timeout: config.task_timeout(),
        shutdown: shutdown.clone(),
    });

    let app = Router::new()
        .route("/health", get(health))
        // Tasks
        .route("/tasks", post(submit_task))
        // Agents
        .route("/agents", get(list_agents))
        .route("/agents/:id/status", get(agent_status))
        .route("/agents/:id/notify", post(notify_agent))
        // Lifecycle
        .route("/organization/start", post(start_organization))
        .route("/organization/stop", post(stop_organization))
        // Memory
        .route("/memories", get(list_memories))
        .route("/memories/prune", post(prune_memories))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let port = config.server_port;
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Cancels in-flight tasks and the sweeper.
    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        sweeper.await?;
    }
    if org.is_running() {
        org.stop()?;
    }
    // Fan-out children still write their audit records.
    org.wait_for_background().await;
    if let Some(memory) = memory {
        memory.close().await?;
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                shutdown.cancelled().await;
            }
            tracing::info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
}

// === Errors ===

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    chain: Vec<String>,
}

struct ApiError(Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            Error::AlreadyInState { .. } => StatusCode::CONFLICT,
            Error::Config(_) | Error::Memory(devorg_memory::Error::InvalidInput(_)) => {
                StatusCode::BAD_REQUEST
            }
            Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Error::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Error::Delegation { .. } | Error::SubordinateFailed { .. } | Error::Generation(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            chain: self.0.chain(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// === Handlers ===

async fn health() -> &'static str {
    "ok"
}

// --- Task handlers ---

async fn submit_task(
    State(state): State<SharedState>,
    Json(task): Json<Task>,
) -> ApiResult<Json<TaskResponse>> {
    if !state.org.is_running() {
        return Err(Error::already_in_state("organization", "stopped").into());
    }

    let ctx = match state.task_timeout {
        Some(timeout) => TaskContext::with_timeout(timeout),
        None => TaskContext::new(),
    }
    .with_token(state.shutdown.child_token());

    let response = state.org.process_task(&ctx, task).await?;
    Ok(Json(response))
}

// --- Agent handlers ---

async fn list_agents(State(state): State<SharedState>) -> Json<Vec<AgentStatusReport>> {
    Json(state.org.statuses())
}

async fn agent_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentStatusReport>> {
    Ok(Json(state.org.status_of(&id)?))
}

#[derive(Debug, Deserialize)]
struct NotifyRequest {
    message: String,
    #[serde(default)]
    details: HashMap<String, serde_json::Value>,
}

async fn notify_agent(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<NotifyRequest>,
) -> ApiResult<StatusCode> {
    state.org.notify(&id, req.message, req.details)?;
    Ok(StatusCode::ACCEPTED)
}

// --- Lifecycle handlers ---

async fn start_organization(State(state): State<SharedState>) -> ApiResult<StatusCode> {
    state.org.start()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_organization(State(state): State<SharedState>) -> ApiResult<StatusCode> {
    state.org.stop()?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Memory handlers ---

#[derive(Debug, Deserialize)]
struct ListMemoriesQuery {
    agent_id: Option<String>,
    memory_type: Option<String>,
    content: Option<String>,
    tag: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_memories(
    State(state): State<SharedState>,
    Query(query): Query<ListMemoriesQuery>,
) -> ApiResult<Json<Vec<MemoryEntry>>> {
    let Some(memory) = &state.memory else {
        return Ok(Json(Vec::new()));
    };

    let memory_type = query
        .memory_type
        .as_deref()
        .map(str::parse::<MemoryType>)
        .transpose()?;

    let filter = MemoryQuery {
        agent_id: query.agent_id,
        memory_type,
        content: query.content,
        tags: query.tag.into_iter().collect(),
        limit: query.limit.unwrap_or(0),
        offset: query.offset.unwrap_or(0),
        ..Default::default()
    };

    let mut entries = memory.query_memories(&filter)?;
    for entry in &mut entries {
        entry.embedding = None;
    }
    Ok(Json(entries))
}

#[derive(Debug, Serialize)]
struct PruneResponse {
    removed: usize,
}

async fn prune_memories(State(state): State<SharedState>) -> ApiResult<Json<PruneResponse>> {
    let removed = match &state.memory {
        Some(memory) => memory.prune_expired_memories().await?,
        None => 0,
    };
    Ok(Json(PruneResponse { removed }))
}
