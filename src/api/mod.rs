use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::MemoryError;
use crate::{db, db_call, AppState};

mod admin;
mod memory;

use admin::*;
use memory::*;

/// When an API key is configured, every protected route needs
/// `Authorization: Bearer <key>`.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, MemoryError> {
    if let Some(expected) = state.api_key.as_deref() {
        let presented = bearer_token(req.headers()).ok_or(MemoryError::Unauthorized)?;
        if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(MemoryError::Unauthorized);
        }
    }
    Ok(next.run(req).await)
}

/// Token from an `Authorization` header; the scheme name is case-insensitive.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/health", get(health));

    let protected = Router::new()
        .route("/ingest", post(do_ingest))
        .route("/context", post(do_context))
        .route("/nodes/recent", get(list_recent))
        .route("/nodes/{id}", get(get_node))
        .route("/jobs/{job}", post(run_job))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = db_call(&state.db, |db| db.stats())
        .await
        .and_then(|r| r)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "stats unavailable");
            db::Stats::default()
        });

    Json(serde_json::json!({
        "name": "leepa-memory",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "embed_dim": state.embedder.dim(),
        "consolidation": state.consolidation,
        "auth": state.api_key.is_some(),
        "embed_cache": state.embed_cache.stats(),
        "stats": stats,
    }))
}
