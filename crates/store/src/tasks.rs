//! Task queue operations: idempotent creation, due-task claims, status
//! transitions with terminal-state guards, progress blobs, and cleanup.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use vh_domain::task::{TaskRecord, TaskStatus};

use crate::{now_ts, Result, Store};

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub cleaned_count: usize,
    pub days_kept: u32,
}

impl Store {
    /// Insert a task; a duplicate id is a no-op (`INSERT OR IGNORE`).
    pub fn create_task(
        &self,
        id: &str,
        kind: &str,
        task_params: &Value,
        schedule_at: Option<f64>,
        timeout_sec: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO tasks (id, type, params_json, created_at, schedule_at, timeout_sec)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    kind,
                    serde_json::to_string(task_params)?,
                    now_ts(),
                    schedule_at,
                    timeout_sec
                ],
            )?;
            Ok(())
        })?;
        tracing::info!(task_id = id, kind, "task created");
        Ok(())
    }

    /// Pending tasks that are due, oldest schedule first. Reading does not
    /// claim; the caller transitions the winner to `running`.
    pub fn claim_due(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks
                 WHERE status = 'pending'
                   AND (schedule_at IS NULL OR schedule_at <= ?1)
                 ORDER BY schedule_at ASC, created_at ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![now_ts(), limit as i64], task_from_row)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Transition a task. `running` stamps `started_at` (and the worker),
    /// terminal states stamp `finished_at` and the result. A task already
    /// in a terminal state is left untouched.
    pub fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        worker_id: Option<&str>,
        result: Option<&Value>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let now = now_ts();
            match status {
                TaskStatus::Running => {
                    conn.execute(
                        "UPDATE tasks SET status = ?1, started_at = ?2, worker_id = COALESCE(?3, worker_id)
                         WHERE id = ?4 AND status NOT IN ('completed', 'failed', 'cancelled')",
                        params![status.as_str(), now, worker_id, id],
                    )?;
                }
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                    let result_json = match result {
                        Some(v) => serde_json::to_string(v)?,
                        None => "{}".to_string(),
                    };
                    conn.execute(
                        "UPDATE tasks SET status = ?1, finished_at = ?2, result_json = ?3
                         WHERE id = ?4 AND status NOT IN ('completed', 'failed', 'cancelled')",
                        params![status.as_str(), now, result_json, id],
                    )?;
                }
                TaskStatus::Pending => {
                    conn.execute(
                        "UPDATE tasks SET status = ?1
                         WHERE id = ?2 AND status NOT IN ('completed', 'failed', 'cancelled')",
                        params![status.as_str(), id],
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Overwrite the task's progress blob.
    pub fn update_task_progress(&self, id: &str, progress: &Value) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET progress_json = ?1 WHERE id = ?2",
                params![serde_json::to_string(progress)?, id],
            )?;
            Ok(())
        })
    }

    pub fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT * FROM tasks WHERE id = ?1", params![id], task_from_row)
                .optional()?)
        })
    }

    /// Paginated task listing, newest first. An empty status slice means
    /// all statuses.
    pub fn get_tasks(
        &self,
        statuses: &[TaskStatus],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskRecord>> {
        self.with_conn(|conn| {
            let mut sql = "SELECT * FROM tasks".to_string();
            if !statuses.is_empty() {
                let placeholders = vec!["?"; statuses.len()].join(",");
                sql.push_str(&format!(" WHERE status IN ({placeholders})"));
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

            let mut stmt = conn.prepare(&sql)?;
            let mut bind: Vec<Box<dyn rusqlite::ToSql>> = statuses
                .iter()
                .map(|s| Box::new(s.as_str()) as Box<dyn rusqlite::ToSql>)
                .collect();
            bind.push(Box::new(limit as i64));
            bind.push(Box::new(offset as i64));
            let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();

            let rows = stmt.query_map(bind_refs.as_slice(), task_from_row)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Tasks stuck in `running` past `started_at + timeout_sec`.
    pub fn get_timed_out_tasks(&self) -> Result<Vec<TaskRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks
                 WHERE status = 'running'
                   AND started_at IS NOT NULL
                   AND started_at + timeout_sec < ?1",
            )?;
            let rows = stmt.query_map(params![now_ts()], task_from_row)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }

    /// Count of tasks currently in `running` for the given type.
    pub fn count_running_of_type(&self, kind: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE status = 'running' AND type = ?1",
                params![kind],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Flip every pending task to cancelled; returns how many moved.
    pub fn clear_pending(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE tasks SET status = 'cancelled', finished_at = ?1 WHERE status = 'pending'",
                params![now_ts()],
            )?;
            Ok(n)
        })
    }

    /// How many terminal tasks a cleanup with `days_to_keep` would delete.
    pub fn count_cleanup_candidates(&self, days_to_keep: u32) -> Result<usize> {
        let cutoff = now_ts() - f64::from(days_to_keep) * 86_400.0;
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks
                 WHERE status IN ('completed', 'failed', 'cancelled')
                   AND COALESCE(finished_at, 0) < ?1",
                params![cutoff],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Delete terminal tasks older than `days_to_keep`; optionally VACUUM.
    pub fn cleanup_old_tasks(&self, days_to_keep: u32, vacuum: bool) -> Result<CleanupReport> {
        let cutoff = now_ts() - f64::from(days_to_keep) * 86_400.0;
        let cleaned = self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM tasks
                 WHERE status IN ('completed', 'failed', 'cancelled')
                   AND COALESCE(finished_at, 0) < ?1",
                params![cutoff],
            )?;
            if vacuum {
                conn.execute_batch("VACUUM")?;
            }
            Ok(n)
        })?;
        tracing::info!(cleaned, days_to_keep, "old tasks cleaned up");
        Ok(CleanupReport {
            cleaned_count: cleaned,
            days_kept: days_to_keep,
        })
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let parse_blob = |col: &str| -> rusqlite::Result<Option<Value>> {
        let raw: Option<String> = row.get(col)?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    };
    let status_raw: String = row.get("status")?;
    Ok(TaskRecord {
        id: row.get("id")?,
        kind: row.get("type")?,
        status: TaskStatus::parse(&status_raw).unwrap_or(TaskStatus::Pending),
        created_at: row.get("created_at")?,
        schedule_at: row.get("schedule_at")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        timeout_sec: row.get("timeout_sec")?,
        worker_id: row.get("worker_id")?,
        params: parse_blob("params_json")?,
        result: parse_blob("result_json")?,
        progress: parse_blob("progress_json")?,
    })
}
