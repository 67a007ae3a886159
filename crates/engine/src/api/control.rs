//! Runtime control: worker freeze, queue clear, daemon lifecycle, config
//! read/write, schedule preview, and the log tail.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use vh_domain::config::{write_with_backup, Config};
use vh_store::processes::{pid_alive, PROCESS_SCHEDULER_DAEMON};

use super::api_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workers / queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct FreezeBody {
    frozen: bool,
}

/// POST /api/workers/freeze — stop/resume claiming; running tasks finish.
pub async fn freeze_workers(
    State(state): State<AppState>,
    Json(body): Json<FreezeBody>,
) -> Response {
    state.dispatcher.set_frozen(body.frozen);
    Json(json!({"status": "ok", "frozen": body.frozen})).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ClearQueueBody {
    status: String,
}

/// POST /api/queue/clear — only the pending set may be cleared.
pub async fn clear_queue(
    State(state): State<AppState>,
    Json(body): Json<ClearQueueBody>,
) -> Response {
    if body.status != "pending" {
        return api_error(
            StatusCode::BAD_REQUEST,
            "only {\"status\": \"pending\"} can be cleared",
        );
    }
    match state.store.clear_pending() {
        Ok(n) => Json(json!({"status": "ok", "cleared": n})).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Daemon lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /api/daemon/status — registry row reconciled against the OS pid.
pub async fn daemon_status(State(state): State<AppState>) -> Response {
    match state.store.get_process(PROCESS_SCHEDULER_DAEMON) {
        Ok(Some(record)) => {
            let alive = record.status == "running" && pid_alive(record.pid);
            Json(json!({
                "name": record.name,
                "pid": record.pid,
                "status": if alive { record.status.as_str() } else { "stale" },
                "alive": alive,
                "host": record.host,
                "port": record.port,
                "start_time": record.start_time,
            }))
            .into_response()
        }
        Ok(None) => Json(json!({
            "name": PROCESS_SCHEDULER_DAEMON,
            "status": "not_registered",
            "alive": false,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /api/daemon/{start|stop|restart}
pub async fn daemon_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Response {
    match action.as_str() {
        "stop" => match state.store.kill_process(PROCESS_SCHEDULER_DAEMON) {
            Ok(true) => Json(json!({"status": "ok", "action": "stop"})).into_response(),
            Ok(false) => api_error(StatusCode::NOT_FOUND, "daemon is not running"),
            Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        "start" => match spawn_daemon() {
            Ok(pid) => Json(json!({"status": "ok", "action": "start", "pid": pid})).into_response(),
            Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        "restart" => {
            if let Err(e) = state.store.kill_process(PROCESS_SCHEDULER_DAEMON) {
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
            match spawn_daemon() {
                Ok(pid) => {
                    Json(json!({"status": "ok", "action": "restart", "pid": pid})).into_response()
                }
                Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        other => api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown daemon action: {other}"),
        ),
    }
}

/// Detached `vacharvest start` child; it registers itself on boot.
fn spawn_daemon() -> std::io::Result<u32> {
    let exe = std::env::current_exe()?;
    let child = std::process::Command::new(exe)
        .arg("start")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    tracing::info!(pid = child.id(), "daemon spawned");
    Ok(child.id())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config read / write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /api/config — the active file verbatim (defaults when missing).
pub async fn read_config(State(state): State<AppState>) -> Response {
    if state.config_path.exists() {
        match std::fs::read_to_string(&state.config_path)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                serde_json::from_str::<serde_json::Value>(&raw).map_err(|e| e.to_string())
            }) {
            Ok(value) => Json(value).into_response(),
            Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e),
        }
    } else {
        match serde_json::to_value(Config::default()) {
            Ok(value) => Json(value).into_response(),
            Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

/// POST /api/config — validate, back up, replace atomically. An invalid
/// document never touches the live file.
pub async fn write_config(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let parsed: Config = match serde_json::from_value(body.clone()) {
        Ok(c) => c,
        Err(e) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("config rejected: {e}"),
            )
        }
    };
    let issues = parsed.validate();
    if let Some(fatal) = issues
        .iter()
        .find(|i| i.severity == vh_domain::config::ConfigSeverity::Error)
    {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("config rejected: {fatal}"),
        );
    }

    let pretty = match serde_json::to_string_pretty(&body) {
        Ok(p) => p,
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    match write_with_backup(&state.config_path, &pretty) {
        Ok(backup) => Json(json!({
            "status": "ok",
            "backup": if backup.as_os_str().is_empty() {
                serde_json::Value::Null
            } else {
                json!(backup.display().to_string())
            },
            "warnings": issues.iter().map(|i| i.message.clone()).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedule / logs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /api/schedule/next — HH:MM of the next vacancy load.
pub async fn schedule_next(State(state): State<AppState>) -> Response {
    match state.scheduler.next_scheduled_load() {
        Some(next) => Json(json!({
            "next_load_at": next.format("%H:%M").to_string(),
            "next_load_iso": next.to_rfc3339(),
        }))
        .into_response(),
        None => Json(json!({"next_load_at": serde_json::Value::Null})).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    50
}

/// GET /api/logs/app?limit= — last N lines of the structured log file.
pub async fn app_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let limit = query.limit.clamp(20, 100);
    let path = &state.config.logging.file;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(limit);
            Json(json!({
                "lines": lines[start..],
                "count": lines.len() - start,
                "file": path.display().to_string(),
            }))
            .into_response()
        }
        Err(e) => api_error(
            StatusCode::NOT_FOUND,
            format!("log file unavailable: {e}"),
        ),
    }
}
