//! HTTP control surface. Read endpoints serve store/scheduler state;
//! command endpoints drive the dispatcher, filters, config, and daemon
//! lifecycle. Failures come back as `{"status": "error", "message": …}`
//! with an appropriate status code.

pub mod control;
pub mod filters;
pub mod stats;
pub mod tasks;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Read surface
        .route("/api/stats", get(stats::get_stats))
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/:id", get(tasks::get_task))
        .route("/api/vacancies/recent", get(stats::recent_vacancies))
        .route("/api/schedule/next", get(control::schedule_next))
        .route("/api/logs/app", get(control::app_logs))
        // Filters
        .route("/api/filters", get(filters::list_filters))
        .route("/api/filters/set-active", post(filters::set_active))
        .route("/api/filters/toggle-all", post(filters::toggle_all))
        .route("/api/filters/invert", post(filters::invert))
        .route("/api/filters/load-now", post(filters::load_now))
        // Runtime control
        .route("/api/workers/freeze", post(control::freeze_workers))
        .route("/api/queue/clear", post(control::clear_queue))
        .route("/api/daemon/status", get(control::daemon_status))
        .route("/api/daemon/:action", post(control::daemon_action))
        // Config
        .route("/api/config", get(control::read_config).post(control::write_config))
        // Push
        .route("/api/ws", get(ws::snapshot_ws))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Standardized JSON error body.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "message": message.into(),
        })),
    )
        .into_response()
}
