//! Stats and vacancy read endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::api_error;
use crate::state::AppState;

/// GET /api/stats — task counters, vacancy counters, system metrics,
/// worker occupancy.
pub async fn get_stats(State(state): State<AppState>) -> Response {
    let store_stats = match state.store.get_stats() {
        Ok(s) => s,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let metrics = state.monitor.sample().await;
    let dispatcher = state.dispatcher.get_status();

    Json(json!({
        "tasks": store_stats.tasks,
        "vacancies": store_stats.vacancies,
        "system": {
            "cpu_percent": metrics.cpu_percent,
            "memory_percent": metrics.memory_percent,
            "disk_percent": metrics.disk_percent,
            "database_size_mb": metrics.database_size_mb,
            "overall_status": metrics.overall_status,
            "alerts": metrics.alerts,
        },
        "workers": {
            "active": dispatcher.current_tasks.len(),
            "configured": dispatcher.workers_count,
            "queue_depth": dispatcher.queue_depth,
            "frozen": dispatcher.frozen,
            "running": dispatcher.running,
        },
        "timestamp": store_stats.timestamp,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET /api/vacancies/recent?limit= — newest vacancies first.
pub async fn recent_vacancies(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Response {
    let limit = query.limit.clamp(1, 100);
    match state.store.get_recent_vacancies(limit) {
        Ok(rows) => {
            let count = rows.len();
            Json(json!({"vacancies": rows, "count": count})).into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
