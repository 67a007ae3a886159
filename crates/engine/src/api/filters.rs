//! Filter management endpoints. Mutations go through the filters file
//! atomically (temp + rename, previous copy backed up).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use vh_domain::filter::FiltersFile;

use super::api_error;
use crate::state::AppState;

/// GET /api/filters — the filter list with the derived `active` flag and
/// each filter's vacancy intake over the trailing week.
pub async fn list_filters(State(state): State<AppState>) -> Response {
    let weekly: std::collections::HashMap<String, i64> = state
        .store
        .get_vacancy_count_by_filter()
        .map(|counts| counts.into_iter().collect())
        .unwrap_or_default();

    match FiltersFile::load(&state.filters_path) {
        Ok(file) => {
            let filters: Vec<_> = file
                .filters
                .iter()
                .map(|f| {
                    json!({
                        "id": f.id,
                        "name": f.name,
                        "active": f.is_active(),
                        "params": f.params,
                        "loaded_7d": weekly.get(&f.id).copied().unwrap_or(0),
                    })
                })
                .collect();
            let count = filters.len();
            Json(json!({"filters": filters, "count": count})).into_response()
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetActiveBody {
    id: String,
    active: bool,
}

/// POST /api/filters/set-active
pub async fn set_active(
    State(state): State<AppState>,
    Json(body): Json<SetActiveBody>,
) -> Response {
    with_filters(&state, move |file| {
        if !file.set_active(&body.id, body.active) {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("unknown filter id: {}", body.id),
            ));
        }
        Ok(json!({"status": "ok", "id": body.id, "active": body.active}))
    })
}

#[derive(Debug, Deserialize)]
pub struct ToggleAllBody {
    enable: bool,
}

/// POST /api/filters/toggle-all
pub async fn toggle_all(
    State(state): State<AppState>,
    Json(body): Json<ToggleAllBody>,
) -> Response {
    with_filters(&state, move |file| {
        file.set_all(body.enable);
        Ok(json!({"status": "ok", "active_count": file.active().count()}))
    })
}

/// POST /api/filters/invert
pub async fn invert(State(state): State<AppState>) -> Response {
    with_filters(&state, |file| {
        file.invert();
        Ok(json!({"status": "ok", "active_count": file.active().count()}))
    })
}

#[derive(Debug, Deserialize, Default)]
pub struct LoadNowBody {
    #[serde(default)]
    filter_ids: Option<Vec<String>>,
    #[serde(default)]
    max_pages: Option<u32>,
}

/// POST /api/filters/load-now — immediate load tasks for the named
/// filters (or every active one).
pub async fn load_now(
    State(state): State<AppState>,
    body: Option<Json<LoadNowBody>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let file = match FiltersFile::load(&state.filters_path) {
        Ok(f) => f,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let selected: Vec<_> = match &body.filter_ids {
        Some(ids) => {
            let mut out = Vec::new();
            for id in ids {
                match file.get(id) {
                    Some(f) => out.push(f.clone()),
                    None => {
                        return api_error(
                            StatusCode::NOT_FOUND,
                            format!("unknown filter id: {id}"),
                        )
                    }
                }
            }
            out
        }
        None => file.active().cloned().collect(),
    };

    if selected.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "no filters selected");
    }

    let mut task_ids = Vec::new();
    for filter in &selected {
        let mut params = json!({"filter": filter});
        if let Some(max_pages) = body.max_pages {
            params["max_pages"] = json!(max_pages);
        }
        match state
            .dispatcher
            .add_task("load_vacancies", params, None, None)
        {
            Ok(id) => task_ids.push(id),
            Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    Json(json!({"status": "ok", "task_ids": task_ids})).into_response()
}

/// Load, mutate, save. The mutation may bail with a ready error response.
fn with_filters(
    state: &AppState,
    mutate: impl FnOnce(&mut FiltersFile) -> Result<serde_json::Value, Response>,
) -> Response {
    let mut file = match FiltersFile::load(&state.filters_path) {
        Ok(f) => f,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let ok = match mutate(&mut file) {
        Ok(body) => body,
        Err(response) => return response,
    };
    if let Err(e) = file.save(&state.filters_path) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    Json(ok).into_response()
}
