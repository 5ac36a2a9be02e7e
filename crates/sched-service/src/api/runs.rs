//! Read-only Run / Attempt endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use uuid::Uuid;

use crate::api::api_error;
use crate::state::AppState;

pub async fn get_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.store.get_run(&id).await {
        Some(run) => Json(serde_json::json!({ "run": run })).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "run not found"),
    }
}

pub async fn list_runs_for_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if state.store.get_schedule(&id).await.is_none() {
        return api_error(StatusCode::NOT_FOUND, "schedule not found");
    }
    let runs = state.store.list_runs_for_schedule(&id).await;
    Json(serde_json::json!({ "runs": runs, "count": runs.len() })).into_response()
}

pub async fn list_attempts(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if state.store.get_run(&id).await.is_none() {
        return api_error(StatusCode::NOT_FOUND, "run not found");
    }
    let attempts = state.store.list_attempts_for_run(&id).await;
    Json(serde_json::json!({ "attempts": attempts, "count": attempts.len() })).into_response()
}
