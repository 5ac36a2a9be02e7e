pub mod runs;
pub mod schedules;
pub mod targets;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the HTTP/JSON API router exposing CRUD over targets/schedules
/// and read access over runs/attempts.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/targets", get(targets::list_targets).post(targets::create_target))
        .route(
            "/v1/targets/:id",
            get(targets::get_target).put(targets::update_target).delete(targets::delete_target),
        )
        .route("/v1/schedules", get(schedules::list_schedules).post(schedules::create_schedule))
        .route(
            "/v1/schedules/:id",
            get(schedules::get_schedule)
                .put(schedules::update_schedule)
                .delete(schedules::delete_schedule),
        )
        .route("/v1/schedules/:id/pause", post(schedules::pause_schedule))
        .route("/v1/schedules/:id/resume", post(schedules::resume_schedule))
        .route("/v1/schedules/:id/runs", get(runs::list_runs_for_schedule))
        .route("/v1/runs/:id", get(runs::get_run))
        .route("/v1/runs/:id/attempts", get(runs::list_attempts))
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: axum::http::StatusCode, message: impl Into<String>) -> axum::response::Response {
    use axum::response::IntoResponse;
    (status, axum::Json(serde_json::json!({ "error": message.into() }))).into_response()
}
