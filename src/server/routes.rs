//! Route table and handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::AppState;
use crate::pipeline::{BatchRequest, PipelineError};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze/batch", post(analyze_batch))
        .route("/api/analyze/status/:id", get(analysis_status))
        .route("/api/repos/prepare", post(prepare_repo))
        .route("/api/repos/:owner/:repo", delete(cleanup_repo))
        .with_state(state)
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message, "kind": kind })),
    )
        .into_response()
}

fn pipeline_error(e: PipelineError) -> Response {
    let status = match e.kind() {
        "invalid_name" | "invalid_request" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "repository_too_large" => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.kind(), e.to_string())
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("Invalid JSON request: {e}"),
        )
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "backend": state.pipeline.model_name(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn analyze_batch(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: BatchRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    info!(
        "Batch request for {}/{} (batch {})",
        request.owner, request.repo, request.batch_index
    );

    let token = state.shutdown.child_token();
    match state.pipeline.run_batch(request, &token).await {
        Ok(response) => {
            let status = StatusCode::from_u16(response.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(response)).into_response()
        }
        Err(e) => {
            warn!("Batch request failed: {}", e);
            pipeline_error(e)
        }
    }
}

async fn analysis_status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.pipeline.session(&id) {
        Some(session) => Json(session).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Unknown analysis ID: {id}"),
        ),
    }
}

#[derive(Deserialize)]
struct PrepareRequest {
    owner: String,
    repo: String,
}

async fn prepare_repo(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: PrepareRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match state.pipeline.prepare(&request.owner, &request.repo).await {
        Ok(prepared) => Json(prepared).into_response(),
        Err(e) => pipeline_error(e),
    }
}

async fn cleanup_repo(
    State(state): State<Arc<AppState>>,
    Path((owner, repo)): Path<(String, String)>,
) -> Response {
    match state.pipeline.cleanup(&owner, &repo).await {
        Ok(removed) => Json(json!({ "success": true, "removed": removed })).into_response(),
        Err(e) => pipeline_error(e),
    }
}
