//! HTTP adapter around the runner.
//!
//! A deliberately thin surface: one route that accepts a snippet and
//! returns its outcome, plus a health probe. Everything interesting
//! happens in [`crate::runner::AgentRun`].

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::runner::AgentRun;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    runner: Arc<AgentRun>,
}

/// Builds the router: `POST /v1/run/` and `GET /healthz`.
pub fn build_app(runner: Arc<AgentRun>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/run/", post(run_snippet))
        .with_state(AppState { runner })
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    code: String,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    output: String,
}

async fn run_snippet(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, (StatusCode, String)> {
    // Every malformed body maps to 400, matching the wire contract.
    let Json(request) = payload.map_err(|err| (StatusCode::BAD_REQUEST, err.body_text()))?;

    match state.runner.execute(&request.code).await {
        Ok(output) => Ok(Json(RunResponse { output })),
        Err(err) => {
            error!("Run failed: {err:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "container runtime unavailable".to_string(),
            ))
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}
