//! Ingestion, context, and node lookup handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::context::ContextResult;
use crate::db::Node;
use crate::error::MemoryError;
use crate::ingest::IngestOutcome;
use crate::{db_call, AppState};

#[derive(Deserialize)]
pub(super) struct IngestBody {
    #[serde(default)]
    author: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

pub(super) async fn do_ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<(StatusCode, Json<IngestOutcome>), MemoryError> {
    let outcome = state
        .ingestor()
        .ingest(&body.author, &body.content, body.tags)
        .await?;
    let status = match outcome {
        IngestOutcome::Stored { .. } => StatusCode::CREATED,
        IngestOutcome::Duplicate { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

#[derive(Deserialize)]
pub(super) struct ContextBody {
    query: String,
    top_k: Option<usize>,
}

pub(super) async fn do_context(
    State(state): State<AppState>,
    Json(body): Json<ContextBody>,
) -> Result<Json<ContextResult>, MemoryError> {
    let result = state.assembler().assemble(&body.query, body.top_k).await?;
    Ok(Json(result))
}

pub(super) async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Node>, MemoryError> {
    let node = db_call(&state.db, move |db| db.get_node(id)).await??;
    node.ok_or(MemoryError::NotFound).map(Json)
}

#[derive(Deserialize)]
pub(super) struct RecentQuery {
    limit: Option<usize>,
}

pub(super) async fn list_recent(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<serde_json::Value>, MemoryError> {
    let limit = q.limit.unwrap_or(20).min(100);
    let nodes = db_call(&state.db, move |db| db.get_recent_nodes(limit)).await??;
    Ok(Json(serde_json::json!({
        "count": nodes.len(),
        "nodes": nodes,
    })))
}
