//! Schedule CRUD + pause/resume.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use sched_domain::{Schedule, ScheduleStatus, ScheduleType};
use sched_trigger::validation::validate_schedule_fields;

use crate::api::api_error;
use crate::state::AppState;

pub async fn list_schedules(State(state): State<AppState>) -> impl IntoResponse {
    let schedules = state.store.list_schedules().await;
    Json(serde_json::json!({ "schedules": schedules, "count": schedules.len() }))
}

pub async fn get_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.store.get_schedule(&id).await {
        Some(schedule) => {
            let next = sched_trigger::next_fire(&schedule, None, state.tz);
            Json(serde_json::json!({ "schedule": schedule, "next_fire_at": next })).into_response()
        }
        None => api_error(StatusCode::NOT_FOUND, "schedule not found"),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub target_id: Uuid,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub interval_seconds: Option<u32>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub start_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub max_runs: Option<u64>,
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> impl IntoResponse {
    if state.store.get_target(&req.target_id).await.is_none() {
        return api_error(StatusCode::BAD_REQUEST, "target_id does not reference an existing target");
    }

    if let Err(msg) = validate_schedule_fields(
        req.schedule_type,
        req.interval_seconds,
        req.cron_expression.as_deref(),
        req.duration_seconds,
        req.max_runs,
    ) {
        return api_error(StatusCode::BAD_REQUEST, msg);
    }

    let now = chrono::Utc::now();
    let schedule = Schedule {
        id: Uuid::new_v4(),
        name: req.name,
        target_id: req.target_id,
        schedule_type: req.schedule_type,
        interval_seconds: req.interval_seconds,
        cron_expression: req.cron_expression,
        start_at: req.start_at.unwrap_or(now),
        duration_seconds: req.duration_seconds,
        max_runs: req.max_runs,
        status: ScheduleStatus::Active,
        runs_count: 0,
        next_run_at: None,
        consecutive_failures: 0,
        last_error: None,
        last_error_at: None,
        created_at: now,
        updated_at: now,
    };

    let created = match state.store.create_schedule(schedule).await {
        Ok(created) => created,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    state.scheduler.on_schedule_created(created.id).await;

    (StatusCode::CREATED, Json(serde_json::json!({ "schedule": created }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRequest {
    pub name: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    pub interval_seconds: Option<Option<u32>>,
    pub cron_expression: Option<Option<String>>,
    pub duration_seconds: Option<Option<u64>>,
    pub max_runs: Option<Option<u64>>,
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateScheduleRequest>,
) -> impl IntoResponse {
    let Some(existing) = state.store.get_schedule(&id).await else {
        return api_error(StatusCode::NOT_FOUND, "schedule not found");
    };

    let schedule_type = req.schedule_type.unwrap_or(existing.schedule_type);
    let interval_seconds = req.interval_seconds.unwrap_or(existing.interval_seconds);
    let cron_expression = req
        .cron_expression
        .clone()
        .unwrap_or_else(|| existing.cron_expression.clone());
    let duration_seconds = req.duration_seconds.unwrap_or(existing.duration_seconds);
    let max_runs = req.max_runs.unwrap_or(existing.max_runs);

    if let Err(msg) = validate_schedule_fields(
        schedule_type,
        interval_seconds,
        cron_expression.as_deref(),
        duration_seconds,
        max_runs,
    ) {
        return api_error(StatusCode::BAD_REQUEST, msg);
    }

    let now = chrono::Utc::now();
    let updated = state
        .store
        .update_schedule(&id, |s| {
            if let Some(name) = req.name {
                s.name = name;
            }
            s.schedule_type = schedule_type;
            s.interval_seconds = interval_seconds;
            s.cron_expression = cron_expression;
            s.duration_seconds = duration_seconds;
            s.max_runs = max_runs;
            s.updated_at = now;
        })
        .await;

    let Some(updated) = updated else {
        return api_error(StatusCode::NOT_FOUND, "schedule not found");
    };

    state.scheduler.on_schedule_updated(id).await;

    Json(serde_json::json!({ "schedule": updated })).into_response()
}

pub async fn pause_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if state.store.get_schedule(&id).await.is_none() {
        return api_error(StatusCode::NOT_FOUND, "schedule not found");
    }
    state.scheduler.on_schedule_paused(id).await;
    match state.store.get_schedule(&id).await {
        Some(schedule) => Json(serde_json::json!({ "schedule": schedule })).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "schedule not found"),
    }
}

pub async fn resume_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if state.store.get_schedule(&id).await.is_none() {
        return api_error(StatusCode::NOT_FOUND, "schedule not found");
    }
    state.scheduler.on_schedule_resumed(id).await;
    match state.store.get_schedule(&id).await {
        Some(schedule) => Json(serde_json::json!({ "schedule": schedule })).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "schedule not found"),
    }
}

/// Disarms before the Store row disappears, per the same lifecycle
/// invariant as Target deletion.
pub async fn delete_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if state.store.get_schedule(&id).await.is_none() {
        return api_error(StatusCode::NOT_FOUND, "schedule not found");
    }
    state.scheduler.on_schedule_deleted(id).await;
    let deleted = state.store.delete_schedule(&id).await;
    Json(serde_json::json!({ "deleted": deleted })).into_response()
}
