//! Task queue read endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use vh_domain::task::TaskStatus;

use super::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Comma-separated status set, e.g. `running,failed`.
    #[serde(default)]
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /api/tasks?status=&limit=&offset=
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let mut statuses = Vec::new();
    if let Some(raw) = &query.status {
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match TaskStatus::parse(part) {
                Some(status) => statuses.push(status),
                None => {
                    return api_error(
                        StatusCode::BAD_REQUEST,
                        format!("unknown task status: {part}"),
                    )
                }
            }
        }
    }

    let limit = query.limit.clamp(1, 500);
    match state.store.get_tasks(&statuses, limit, query.offset) {
        Ok(tasks) => {
            let count = tasks.len();
            Json(json!({
                "tasks": tasks,
                "count": count,
                "limit": limit,
                "offset": query.offset,
            }))
            .into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/tasks/:id — the full record.
pub async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_task(&id) {
        Ok(Some(task)) => Json(task).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, format!("task not found: {id}")),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
