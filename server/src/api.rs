//! HTTP handlers — a thin forwarding layer over the engine.
//!
//! Every error crosses the boundary as `{code, message}` with one of the
//! public codes (`not_found`, `invalid_input`, `io_error`, `internal`); the
//! scan endpoint additionally carries its partial report on failure.

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use filesense_core::{CancelToken, Engine, Error};

#[derive(Clone)]
pub struct AppContext {
    pub engine: Arc<Engine>,
    pub start_time: Instant,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

/// Collapse internal error kinds onto the public boundary codes.
fn boundary_code(err: &Error) -> &'static str {
    match err.code() {
        "not_found" => "not_found",
        "invalid_input" => "invalid_input",
        "io_error" | "decode_error" => "io_error",
        _ => "internal",
    }
}

fn error_response(err: &Error) -> ApiError {
    let code = boundary_code(err);
    let status = match code {
        "not_found" => StatusCode::NOT_FOUND,
        "invalid_input" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "code": code, "message": err.to_string() })))
}

fn worker_died() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "code": "internal", "message": "worker task failed" })),
    )
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub async fn api_health(State(ctx): State<AppContext>) -> Result<impl IntoResponse, ApiError> {
    let engine = ctx.engine.clone();
    let health = tokio::task::spawn_blocking(move || engine.health())
        .await
        .map_err(|_| worker_died())?
        .map_err(|e| error_response(&e))?;
    Ok(Json(serde_json::json!({
        "ok": health.ok,
        "config_loaded": health.config_loaded,
        "n_files": health.n_files,
        "n_embedded": health.n_embedded,
        "index_dirty": health.index_dirty,
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
    })))
}

// ---------------------------------------------------------------------------
// POST /api/scan
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ScanRequest {
    root: PathBuf,
}

pub async fn api_scan(
    State(ctx): State<AppContext>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = ctx.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.scan(&req.root, &CancelToken::new()))
        .await
        .map_err(|_| worker_died())?;

    match outcome {
        Ok(report) => Ok(Json(serde_json::to_value(report).unwrap_or_default())),
        Err(failure) => {
            let (status, Json(mut body)) = error_response(&failure.error);
            body["report"] = serde_json::to_value(&failure.partial).unwrap_or_default();
            Err((status, Json(body)))
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/recommend
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecommendQuery {
    path: String,
    limit: Option<usize>,
}

pub async fn api_recommend(
    State(ctx): State<AppContext>,
    Query(q): Query<RecommendQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(5);
    if !(1..=100).contains(&limit) {
        let err = Error::InvalidInput(format!("limit must be in 1..=100, got {limit}"));
        return Err(error_response(&err));
    }
    if q.path.is_empty() {
        return Err(error_response(&Error::InvalidInput("path must not be empty".into())));
    }

    let engine = ctx.engine.clone();
    let recs = tokio::task::spawn_blocking(move || engine.recommend(&q.path, limit))
        .await
        .map_err(|_| worker_died())?
        .map_err(|e| error_response(&e))?;
    Ok(Json(recs))
}

// ---------------------------------------------------------------------------
// POST /api/activity/log
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LogRequest {
    path: String,
}

pub async fn api_log(
    State(ctx): State<AppContext>,
    Json(req): Json<LogRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = ctx.engine.clone();
    let summary = tokio::task::spawn_blocking(move || engine.log_activity(&req.path))
        .await
        .map_err(|_| worker_died())?
        .map_err(|e| error_response(&e))?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_codes_collapse_internal_kinds() {
        assert_eq!(boundary_code(&Error::NotFound("x".into())), "not_found");
        assert_eq!(boundary_code(&Error::InvalidInput("x".into())), "invalid_input");
        assert_eq!(boundary_code(&Error::Io("x".into())), "io_error");
        assert_eq!(boundary_code(&Error::Decode("x".into())), "io_error");
        assert_eq!(boundary_code(&Error::Store("x".into())), "internal");
        assert_eq!(boundary_code(&Error::Index("x".into())), "internal");
        assert_eq!(boundary_code(&Error::Embedder("x".into())), "internal");
        assert_eq!(boundary_code(&Error::Cancelled), "internal");
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let (status, Json(body)) = error_response(&Error::NotFound("path not indexed: /x".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
        assert!(body["message"].as_str().unwrap().contains("/x"));
    }
}
