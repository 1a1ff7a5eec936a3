use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{Block, Ledger, NodeRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared handles passed to every handler and to the synchronizer.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub registry: Arc<NodeRegistry>,
    /// Difficulty applied to client appends; the ledger clamps it.
    pub difficulty: u32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    pub status: String,
    pub height: u64,
    pub blocks: usize,
}

#[derive(Deserialize)]
struct AppendRequest {
    data: String,
}

#[derive(Deserialize)]
struct NodeRequest {
    node: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request body: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Registry(RegistryError::Empty | RegistryError::SelfRegistration(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Registry(RegistryError::AlreadyRegistered(_)) => StatusCode::CONFLICT,
            ApiError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/blockchain", get(blockchain))
        .route("/addblock", post(add_block))
        .route("/nodes", get(nodes))
        .route("/registerNode", post(register_node))
        .route("/removeNode", post(remove_node))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let chain = state.ledger.snapshot();
    let status = if state.ledger.is_durable() { "ok" } else { "degraded" };
    Json(Health {
        status: status.to_string(),
        height: chain.last().map_or(0, |b| b.index),
        blocks: chain.len(),
    })
}

async fn blockchain(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.ledger.snapshot().to_vec())
}

async fn add_block(
    State(state): State<AppState>,
    body: Result<Json<AppendRequest>, JsonRejection>,
) -> Result<Json<Block>, ApiError> {
    let Json(request) = body?;
    let ledger = Arc::clone(&state.ledger);
    let difficulty = state.difficulty;
    // Mining is CPU-bound; keep it off the async workers.
    let block = tokio::task::spawn_blocking(move || ledger.append(request.data, difficulty))
        .await
        .map_err(|e| {
            error!(error = %e, "append task failed");
            ApiError::Internal(e.to_string())
        })?;
    Ok(Json(block))
}

async fn nodes(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry.list())
}

async fn register_node(
    State(state): State<AppState>,
    body: Result<Json<NodeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let node = state.registry.add(&request.node)?;
    info!(nodes = ?state.registry.list(), "peer list updated");
    Ok((StatusCode::CREATED, Json(json!({ "registered": node }))))
}

async fn remove_node(
    State(state): State<AppState>,
    body: Result<Json<NodeRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = body?;
    let node = state.registry.remove(&request.node)?;
    info!(nodes = ?state.registry.list(), "peer list updated");
    Ok(Json(json!({ "removed": node })))
}
