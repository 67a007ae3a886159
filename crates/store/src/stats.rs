//! Statistics and health samples backing the stats endpoint and dashboard.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{now_ts, Result, Store};

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Per-status task counts over the trailing 24 hours.
    pub tasks: HashMap<String, i64>,
    pub vacancies: VacancyStats,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VacancyStats {
    pub total: i64,
    pub processed: i64,
    pub today: i64,
    /// Vacancies whose `created_at` falls in the 10-minute window ending
    /// at the most recent load run's latest timestamp.
    pub added_last_run_10m_window: i64,
    pub last_run_at: Option<String>,
}

/// One sample for the `system_health` time series.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSample {
    pub ts: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub database_size_mb: f64,
    pub active_tasks: i64,
    pub host_status: Value,
}

impl Store {
    pub fn get_stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let day_ago = now_ts() - 86_400.0;

            let mut tasks = HashMap::new();
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM tasks WHERE created_at > ?1 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![day_ago], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                tasks.insert(status, count);
            }

            let (total, processed, today) = conn.query_row(
                "SELECT COUNT(*),
                        COUNT(CASE WHEN is_processed = 1 THEN 1 END),
                        COUNT(CASE WHEN created_at > ?1 THEN 1 END)
                 FROM vacancies",
                params![day_ago],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            // Window anchored at the newest load_vacancies task.
            let last_run: Option<(Option<f64>, Option<f64>, Option<f64>)> = conn
                .query_row(
                    "SELECT created_at, started_at, finished_at FROM tasks
                     WHERE type = 'load_vacancies'
                     ORDER BY COALESCE(finished_at, started_at, created_at) DESC
                     LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let mut added_last_run = 0i64;
            let mut last_run_at = None;
            if let Some((created, started, finished)) = last_run {
                let anchor = [created, started, finished]
                    .into_iter()
                    .flatten()
                    .fold(f64::MIN, f64::max);
                if anchor > f64::MIN {
                    added_last_run = conn.query_row(
                        "SELECT COUNT(*) FROM vacancies WHERE created_at BETWEEN ?1 AND ?2",
                        params![anchor - 600.0, anchor],
                        |row| row.get(0),
                    )?;
                    last_run_at = chrono::DateTime::from_timestamp(anchor as i64, 0)
                        .map(|dt| dt.to_rfc3339());
                }
            }

            Ok(StoreStats {
                tasks,
                vacancies: VacancyStats {
                    total,
                    processed,
                    today,
                    added_last_run_10m_window: added_last_run,
                    last_run_at,
                },
                timestamp: chrono::Utc::now().to_rfc3339(),
            })
        })
    }

    /// Change summary over an N-day window (vacancy and employer inserts).
    pub fn get_combined_changes_stats(&self, days: u32) -> Result<Value> {
        let days = days.max(1);
        let cutoff = now_ts() - f64::from(days) * 86_400.0;
        self.with_conn(|conn| {
            let new_vacancies: i64 = conn.query_row(
                "SELECT COUNT(*) FROM vacancies WHERE created_at > ?1",
                params![cutoff],
                |row| row.get(0),
            )?;
            let new_employers: i64 = conn.query_row(
                "SELECT COUNT(*) FROM employers WHERE created_at > ?1",
                params![cutoff],
                |row| row.get(0),
            )?;
            let updated_vacancies: i64 = conn.query_row(
                "SELECT COUNT(*) FROM vacancies WHERE updated_at > ?1 AND created_at <= ?1",
                params![cutoff],
                |row| row.get(0),
            )?;

            Ok(json!({
                "days": days,
                "vacancies": {
                    "new_vacancies": new_vacancies,
                    "updated_in_place": updated_vacancies,
                    "total_changes": new_vacancies + updated_vacancies,
                },
                "employers": {
                    "total_changes": new_employers,
                },
                "summary": {
                    "total_operations": new_vacancies + updated_vacancies + new_employers,
                },
            }))
        })
    }

    pub fn save_system_health(&self, sample: &HealthSample) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO system_health
                 (ts, cpu_percent, memory_percent, disk_percent, database_size_mb, active_tasks, host_status_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    sample.ts,
                    sample.cpu_percent,
                    sample.memory_percent,
                    sample.disk_percent,
                    sample.database_size_mb,
                    sample.active_tasks,
                    serde_json::to_string(&sample.host_status)?
                ],
            )?;
            Ok(())
        })
    }

    /// Latest health samples, newest first.
    pub fn get_recent_health(&self, limit: usize) -> Result<Vec<HealthSample>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ts, cpu_percent, memory_percent, disk_percent,
                        database_size_mb, active_tasks, host_status_json
                 FROM system_health ORDER BY ts DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                let raw: Option<String> = row.get(6)?;
                Ok(HealthSample {
                    ts: row.get(0)?,
                    cpu_percent: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    memory_percent: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    disk_percent: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    database_size_mb: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    active_tasks: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                    host_status: raw
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or(Value::Null),
                })
            })?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::temp_store;
    use serde_json::json;
    use vh_domain::task::TaskStatus;

    fn listing(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Dev",
            "employer": {"id": "1", "name": "Acme"},
            "area": {"name": "Moscow"}
        })
    }

    #[test]
    fn stats_count_tasks_and_vacancies() {
        let (store, _dir) = temp_store();
        store
            .create_task("t1", "load_vacancies", &json!({}), None, 60)
            .unwrap();
        store
            .update_task_status("t1", TaskStatus::Running, Some("w"), None)
            .unwrap();
        store.save_vacancy(&listing("v1"), Some("f1")).unwrap();
        store.save_vacancy(&listing("v2"), Some("f1")).unwrap();
        store
            .update_task_status("t1", TaskStatus::Completed, None, None)
            .unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.tasks.get("completed"), Some(&1));
        assert_eq!(stats.vacancies.total, 2);
        assert_eq!(stats.vacancies.today, 2);
        assert_eq!(stats.vacancies.processed, 0);
        // Both rows landed inside the run's 10-minute window.
        assert_eq!(stats.vacancies.added_last_run_10m_window, 2);
        assert!(stats.vacancies.last_run_at.is_some());
    }

    #[test]
    fn stats_without_any_load_run() {
        let (store, _dir) = temp_store();
        store.save_vacancy(&listing("v1"), None).unwrap();
        let stats = store.get_stats().unwrap();
        assert_eq!(stats.vacancies.added_last_run_10m_window, 0);
        assert!(stats.vacancies.last_run_at.is_none());
    }

    #[test]
    fn combined_changes_counts_new_rows() {
        let (store, _dir) = temp_store();
        store.save_vacancy(&listing("v1"), None).unwrap();
        store
            .save_employer(&json!({"id": "e1", "name": "Acme"}))
            .unwrap();

        let changes = store.get_combined_changes_stats(7).unwrap();
        assert_eq!(changes["vacancies"]["new_vacancies"], 1);
        assert_eq!(changes["employers"]["total_changes"], 1);
        assert_eq!(changes["summary"]["total_operations"], 2);
    }

    #[test]
    fn health_sample_round_trip() {
        let (store, _dir) = temp_store();
        store
            .save_system_health(&HealthSample {
                ts: crate::now_ts(),
                cpu_percent: 42.5,
                memory_percent: 61.0,
                disk_percent: 70.1,
                database_size_mb: 1.5,
                active_tasks: 2,
                host_status: json!({"host2": "disabled"}),
            })
            .unwrap();

        let samples = store.get_recent_health(5).unwrap();
        assert_eq!(samples.len(), 1);
        assert!((samples[0].cpu_percent - 42.5).abs() < f64::EPSILON);
        assert_eq!(samples[0].host_status["host2"], "disabled");
    }
}
