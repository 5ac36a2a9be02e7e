//! Target CRUD.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use sched_domain::{HttpMethod, Target};

use crate::api::api_error;
use crate::state::AppState;

pub async fn list_targets(State(state): State<AppState>) -> impl IntoResponse {
    let targets = state.store.list_targets().await;
    Json(serde_json::json!({ "targets": targets, "count": targets.len() }))
}

pub async fn get_target(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.store.get_target(&id).await {
        Some(target) => Json(serde_json::json!({ "target": target })).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "target not found"),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body_template: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u32>,
}

pub async fn create_target(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> impl IntoResponse {
    if let Err(msg) = sched_trigger::validation::validate_url(&req.url) {
        return api_error(StatusCode::BAD_REQUEST, msg);
    }

    let timeout_seconds = req.timeout_seconds.unwrap_or(state.config.default_timeout_seconds);
    if timeout_seconds == 0 || timeout_seconds > state.config.max_timeout_seconds {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("timeout_seconds must be in 1..={}", state.config.max_timeout_seconds),
        );
    }

    let now = chrono::Utc::now();
    let target = Target {
        id: Uuid::new_v4(),
        name: req.name,
        url: req.url,
        method: req.method,
        headers: req.headers,
        body_template: req.body_template,
        timeout_seconds,
        created_at: now,
        updated_at: now,
    };

    match state.store.create_target(target).await {
        Ok(created) => (StatusCode::CREATED, Json(serde_json::json!({ "target": created }))).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateTargetRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers: Option<HashMap<String, String>>,
    pub body_template: Option<Option<String>>,
    pub timeout_seconds: Option<u32>,
}

pub async fn update_target(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTargetRequest>,
) -> impl IntoResponse {
    if let Some(ref url) = req.url {
        if let Err(msg) = sched_trigger::validation::validate_url(url) {
            return api_error(StatusCode::BAD_REQUEST, msg);
        }
    }
    if let Some(timeout) = req.timeout_seconds {
        if timeout == 0 || timeout > state.config.max_timeout_seconds {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("timeout_seconds must be in 1..={}", state.config.max_timeout_seconds),
            );
        }
    }

    let now = chrono::Utc::now();
    let updated = state
        .store
        .update_target(&id, |t| {
            if let Some(name) = req.name {
                t.name = name;
            }
            if let Some(url) = req.url {
                t.url = url;
            }
            if let Some(method) = req.method {
                t.method = method;
            }
            if let Some(headers) = req.headers {
                t.headers = headers;
            }
            if let Some(body_template) = req.body_template {
                t.body_template = body_template;
            }
            if let Some(timeout_seconds) = req.timeout_seconds {
                t.timeout_seconds = timeout_seconds;
            }
            t.updated_at = now;
        })
        .await;

    match updated {
        Some(target) => Json(serde_json::json!({ "target": target })).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "target not found"),
    }
}

/// Disarms every schedule referencing the target before the cascading
/// delete becomes visible to readers.
pub async fn delete_target(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if state.store.get_target(&id).await.is_none() {
        return api_error(StatusCode::NOT_FOUND, "target not found");
    }

    state.scheduler.on_target_deleted(id).await;

    match state.store.delete_target_cascade(&id).await {
        Ok(summary) => Json(serde_json::json!({
            "deleted": true,
            "schedules_removed": summary.schedules_removed,
            "runs_removed": summary.runs_removed,
            "attempts_removed": summary.attempts_removed,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
