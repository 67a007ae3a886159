//! Recurring-job scheduler. A single cooperative loop evaluates the
//! in-memory job table against wall-clock time every ~60s and enqueues
//! due jobs as durable tasks through the dispatcher.
//!
//! Pattern support is the small set the seeded jobs need: `hourly`,
//! `daily` (02:00), `weekly` (Sunday 03:00), `*/N` minutes, and
//! `0 */N * * *` hours. Anything else falls back to the next hour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use vh_domain::task::{TaskStatus, TaskType};
use vh_store::Store;

use crate::dispatcher::Dispatcher;

/// Scheduler-created tasks in flight at once.
const MAX_CONCURRENT_TASKS: usize = 3;

const DEFAULT_MAX_FAILURES: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub kind: TaskType,
    pub name: String,
    pub pattern: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Local>>,
    pub next_run: Option<DateTime<Local>>,
    pub run_count: u32,
    pub failure_count: u32,
    pub max_failures: u32,
    pub timeout_minutes: i64,
    pub params: Value,
}

pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    store: Arc<Store>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    /// task id → job key, for completion bookkeeping.
    in_flight: Mutex<HashMap<String, String>>,
    max_concurrent: usize,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, store: Arc<Store>) -> Self {
        let scheduler = Self {
            dispatcher,
            store,
            jobs: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            max_concurrent: MAX_CONCURRENT_TASKS,
            tick_interval: Duration::from_secs(60),
        };
        scheduler.seed_default_jobs();
        scheduler
    }

    /// The recurring jobs every deployment starts with.
    fn seed_default_jobs(&self) {
        let now = Local::now();
        let mut add = |key: &str, job: ScheduledJob| {
            self.add_job(key, job, now);
        };

        add(
            "hourly_vacancy_load",
            job(
                TaskType::LoadVacancies,
                "Hourly Vacancy Load",
                "hourly",
                45,
                json!({"max_pages": 200, "scheduled": true, "first_run_delay_sec": 0}),
            ),
        );
        add(
            "daily_employer_load",
            job(
                TaskType::LoadEmployers,
                "Daily Employer Load",
                "daily",
                30,
                json!({"scheduled": true, "first_run_delay_sec": 15}),
            ),
        );
        add(
            "system_cleanup",
            job(
                TaskType::Cleanup,
                "System Cleanup",
                "0 */6 * * *",
                15,
                json!({"keep_days": 30, "vacuum_db": true, "scheduled": true, "first_run_delay_sec": 20}),
            ),
        );
        add(
            "host2_sync",
            job(
                TaskType::ProcessPipeline,
                "Host2 Sync",
                "0 */4 * * *",
                20,
                json!({"stub": "sync_host2", "scheduled": true, "first_run_delay_sec": 25}),
            ),
        );
        add(
            "host3_analysis",
            job(
                TaskType::ProcessPipeline,
                "Host3 Analysis",
                "daily",
                60,
                json!({
                    "stub": "analyze_host3",
                    "batch_size": 50,
                    "analyze_new_only": true,
                    "scheduled": true,
                    "first_run_delay_sec": 30
                }),
            ),
        );
        add(
            "system_health",
            job(
                TaskType::Test,
                "System Health Check",
                "*/5 * * * *",
                2,
                json!({"stub": "system_health", "scheduled": true, "first_run_delay_sec": 5}),
            ),
        );
    }

    /// Register a job; `first_run_delay_sec` defers the initial firing,
    /// otherwise the pattern decides.
    pub fn add_job(&self, key: &str, mut job: ScheduledJob, now: DateTime<Local>) {
        let first_delay = job
            .params
            .get("first_run_delay_sec")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        job.next_run = Some(if first_delay > 0 {
            now + chrono::Duration::seconds(first_delay)
        } else {
            next_run_after(&job.pattern, now)
        });
        tracing::info!(job = %job.name, next_run = ?job.next_run, "job scheduled");
        self.jobs.lock().insert(key.to_string(), job);
    }

    pub fn jobs_snapshot(&self) -> Vec<(String, ScheduledJob)> {
        let mut jobs: Vec<_> = self
            .jobs
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        jobs.sort_by(|a, b| a.0.cmp(&b.0));
        jobs
    }

    /// Next firing of a vacancy load, for the control surface.
    pub fn next_scheduled_load(&self) -> Option<DateTime<Local>> {
        self.jobs
            .lock()
            .values()
            .filter(|j| j.enabled && j.kind == TaskType::LoadVacancies)
            .filter_map(|j| j.next_run)
            .min()
    }

    /// One pass: settle finished tasks, then fire whatever is due.
    pub async fn tick(&self) {
        self.reconcile_finished();
        self.fire_due_jobs();
    }

    fn reconcile_finished(&self) {
        let entries: Vec<(String, String)> = self
            .in_flight
            .lock()
            .iter()
            .map(|(task_id, key)| (task_id.clone(), key.clone()))
            .collect();

        for (task_id, key) in entries {
            let task = match self.store.get_task(&task_id) {
                Ok(Some(task)) if task.status.is_terminal() => task,
                Ok(Some(_)) => continue,
                Ok(None) => {
                    self.in_flight.lock().remove(&task_id);
                    continue;
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "reconcile lookup failed");
                    continue;
                }
            };

            self.in_flight.lock().remove(&task_id);
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(&key) else {
                continue;
            };
            match task.status {
                TaskStatus::Completed => {
                    job.last_run = task
                        .started_at
                        .and_then(|ts| Local.timestamp_opt(ts as i64, 0).single());
                    job.run_count += 1;
                    job.failure_count = 0;
                    tracing::debug!(job = %job.name, runs = job.run_count, "job run completed");
                }
                TaskStatus::Failed => {
                    job.failure_count += 1;
                    tracing::warn!(
                        job = %job.name,
                        failures = job.failure_count,
                        "job run failed"
                    );
                    if job.failure_count >= job.max_failures {
                        job.enabled = false;
                        job.next_run = None;
                        tracing::warn!(job = %job.name, "job disabled after repeated failures");
                    }
                }
                _ => {}
            }
        }
    }

    fn fire_due_jobs(&self) {
        let now = Local::now();
        let due_keys: Vec<String> = {
            let jobs = self.jobs.lock();
            jobs.iter()
                .filter(|(_, j)| j.enabled && j.next_run.is_some_and(|next| next <= now))
                .map(|(k, _)| k.clone())
                .collect()
        };

        for key in due_keys {
            if self.in_flight.lock().len() >= self.max_concurrent {
                tracing::debug!("scheduler concurrency limit reached, deferring");
                break;
            }

            let (kind, params, timeout_minutes, name) = {
                let jobs = self.jobs.lock();
                let Some(job) = jobs.get(&key) else { continue };
                (
                    job.kind,
                    job.params.clone(),
                    job.timeout_minutes,
                    job.name.clone(),
                )
            };

            // One running task per type for the scheduler path.
            match self.store.count_running_of_type(kind.as_str()) {
                Ok(0) => {}
                Ok(_) => {
                    tracing::info!(job = %name, "type already running, retrying next tick");
                    continue;
                }
                Err(e) => {
                    tracing::error!(job = %name, error = %e, "conflict check failed");
                    continue;
                }
            }

            match self
                .dispatcher
                .add_task(kind.as_str(), params, None, Some(timeout_minutes * 60))
            {
                Ok(task_id) => {
                    tracing::info!(job = %name, task_id = %task_id, "job fired");
                    self.in_flight.lock().insert(task_id, key.clone());
                    if let Some(job) = self.jobs.lock().get_mut(&key) {
                        job.next_run = Some(next_run_after(&job.pattern, now));
                    }
                }
                Err(e) => {
                    tracing::error!(job = %name, error = %e, "failed to enqueue job");
                    let mut jobs = self.jobs.lock();
                    if let Some(job) = jobs.get_mut(&key) {
                        job.failure_count += 1;
                        if job.failure_count >= job.max_failures {
                            job.enabled = false;
                            job.next_run = None;
                        }
                    }
                }
            }
        }
    }

    /// Run the tick loop until shutdown fires.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_sec = self.tick_interval.as_secs(),
                "scheduler started"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.tick_interval) => {}
                    _ = shutdown.wait_for(|stop| *stop) => break,
                }
                self.tick().await;
            }
            tracing::info!("scheduler stopped");
        })
    }
}

fn job(
    kind: TaskType,
    name: &str,
    pattern: &str,
    timeout_minutes: i64,
    params: Value,
) -> ScheduledJob {
    ScheduledJob {
        kind,
        name: name.to_string(),
        pattern: pattern.to_string(),
        enabled: true,
        last_run: None,
        next_run: None,
        run_count: 0,
        failure_count: 0,
        max_failures: DEFAULT_MAX_FAILURES,
        timeout_minutes,
        params,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pattern evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Next firing time for a schedule pattern, strictly after `now`.
pub fn next_run_after(pattern: &str, now: DateTime<Local>) -> DateTime<Local> {
    let fallback = top_of_hour(now) + chrono::Duration::hours(1);

    match pattern {
        "hourly" => fallback,
        "daily" => at_time(now.date_naive() + chrono::Days::new(1), 2, now).unwrap_or(fallback),
        "weekly" => {
            // Next Sunday 03:00.
            let mut days_ahead = 6 - i64::from(now.weekday().num_days_from_monday());
            if days_ahead <= 0 {
                days_ahead += 7;
            }
            at_time(
                now.date_naive() + chrono::Days::new(days_ahead as u64),
                3,
                now,
            )
            .unwrap_or(fallback)
        }
        p if p.starts_with("*/") => {
            let minutes = p
                .split_whitespace()
                .next()
                .and_then(|f| f.strip_prefix("*/"))
                .and_then(|n| n.parse::<i64>().ok())
                .filter(|n| *n > 0);
            match minutes {
                Some(n) => now + chrono::Duration::minutes(n),
                None => fallback,
            }
        }
        p if p.starts_with("0 */") => {
            let hours = p
                .split_whitespace()
                .nth(1)
                .and_then(|f| f.strip_prefix("*/"))
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0);
            match hours {
                Some(n) => {
                    let next_hour = (now.hour() / n + 1) * n;
                    if next_hour >= 24 {
                        at_time(now.date_naive() + chrono::Days::new(1), next_hour % 24, now)
                            .unwrap_or(fallback)
                    } else {
                        top_of_hour(now)
                            .with_hour(next_hour)
                            .unwrap_or(fallback)
                    }
                }
                None => fallback,
            }
        }
        _ => fallback,
    }
}

fn top_of_hour(dt: DateTime<Local>) -> DateTime<Local> {
    dt.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

fn at_time(date: chrono::NaiveDate, hour: u32, reference: DateTime<Local>) -> Option<DateTime<Local>> {
    let naive = date.and_hms_opt(hour, 0, 0)?;
    reference
        .timezone()
        .from_local_datetime(&naive)
        .earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vh_auth::AuthRegistry;
    use vh_domain::config::{Config, MonitoringConfig};
    use crate::monitor::SystemMonitor;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn hourly_fires_at_top_of_next_hour() {
        let next = next_run_after("hourly", local(2024, 6, 15, 10, 30));
        assert_eq!(next, local(2024, 6, 15, 11, 0));
    }

    #[test]
    fn daily_fires_at_two_am_next_day() {
        let next = next_run_after("daily", local(2024, 6, 15, 10, 30));
        assert_eq!(next, local(2024, 6, 16, 2, 0));
    }

    #[test]
    fn weekly_fires_sunday_three_am() {
        // 2024-06-15 is a Saturday.
        let next = next_run_after("weekly", local(2024, 6, 15, 10, 0));
        assert_eq!(next, local(2024, 6, 16, 3, 0));
        assert_eq!(next.weekday(), chrono::Weekday::Sun);

        // From a Sunday, the next Sunday is a week out.
        let next = next_run_after("weekly", local(2024, 6, 16, 10, 0));
        assert_eq!(next, local(2024, 6, 23, 3, 0));
    }

    #[test]
    fn minute_steps() {
        let next = next_run_after("*/5 * * * *", local(2024, 6, 15, 10, 30));
        assert_eq!(next, local(2024, 6, 15, 10, 35));
    }

    #[test]
    fn hour_steps_and_midnight_wrap() {
        let next = next_run_after("0 */6 * * *", local(2024, 6, 15, 10, 30));
        assert_eq!(next, local(2024, 6, 15, 12, 0));

        let next = next_run_after("0 */6 * * *", local(2024, 6, 15, 23, 10));
        assert_eq!(next, local(2024, 6, 16, 0, 0));

        let next = next_run_after("0 */4 * * *", local(2024, 6, 15, 3, 0));
        assert_eq!(next, local(2024, 6, 15, 4, 0));
    }

    #[test]
    fn unknown_patterns_fall_back_to_next_hour() {
        for pattern in ["monthly", "1 2 3 4 5", "*/x * * * *", ""] {
            let next = next_run_after(pattern, local(2024, 6, 15, 10, 30));
            assert_eq!(next, local(2024, 6, 15, 11, 0), "pattern {pattern:?}");
        }
    }

    // ── Scheduler behaviour ──────────────────────────────────────────

    fn test_scheduler() -> (Arc<Scheduler>, Arc<Dispatcher>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            Store::open_at(&dir.path().join("s.sqlite3"), 5, true).unwrap(),
        );
        let config = Arc::new(Config::default());
        let monitor = Arc::new(SystemMonitor::new(
            MonitoringConfig::default(),
            store.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            config,
            Arc::new(AuthRegistry::empty()),
            monitor,
            dir.path().join("filters.json"),
        ));
        let scheduler = Arc::new(Scheduler::new(dispatcher.clone(), store));
        (scheduler, dispatcher, dir)
    }

    #[test]
    fn seeds_the_default_jobs() {
        let (scheduler, _dispatcher, _dir) = test_scheduler();
        let jobs = scheduler.jobs_snapshot();
        assert_eq!(jobs.len(), 6);

        let keys: Vec<&str> = jobs.iter().map(|(k, _)| k.as_str()).collect();
        for expected in [
            "daily_employer_load",
            "host2_sync",
            "host3_analysis",
            "hourly_vacancy_load",
            "system_cleanup",
            "system_health",
        ] {
            assert!(keys.contains(&expected), "missing job {expected}");
        }
        assert!(jobs.iter().all(|(_, j)| j.enabled && j.next_run.is_some()));
    }

    #[test]
    fn first_run_delay_defers_initial_firing() {
        let (scheduler, _dispatcher, _dir) = test_scheduler();
        let now = Local::now();
        let jobs = scheduler.jobs_snapshot();
        let health = &jobs.iter().find(|(k, _)| k == "system_health").unwrap().1;
        let delta = health.next_run.unwrap() - now;
        assert!(delta.num_seconds() <= 6, "expected ~5s first-run delay");
    }

    #[tokio::test]
    async fn due_job_creates_exactly_one_task_per_tick() {
        let (scheduler, _dispatcher, _dir) = test_scheduler();
        // Force the health job due.
        {
            let mut jobs = scheduler.jobs.lock();
            for job in jobs.values_mut() {
                job.enabled = false;
            }
            let health = jobs.get_mut("system_health").unwrap();
            health.enabled = true;
            health.next_run = Some(Local::now() - chrono::Duration::minutes(1));
        }

        scheduler.tick().await;
        let tasks = scheduler.store.get_tasks(&[], 50, 0).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, "test");

        // The next_run was recomputed: a second tick fires nothing.
        scheduler.tick().await;
        assert_eq!(scheduler.store.get_tasks(&[], 50, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completion_resets_failures_and_failure_disables() {
        let (scheduler, _dispatcher, _dir) = test_scheduler();
        {
            let mut jobs = scheduler.jobs.lock();
            for job in jobs.values_mut() {
                job.enabled = false;
            }
            let health = jobs.get_mut("system_health").unwrap();
            health.enabled = true;
            health.failure_count = 2;
            health.max_failures = 3;
            health.next_run = Some(Local::now() - chrono::Duration::minutes(1));
        }

        scheduler.tick().await;
        let task_id = scheduler
            .in_flight
            .lock()
            .keys()
            .next()
            .cloned()
            .unwrap();

        // Simulate a successful run.
        scheduler
            .store
            .update_task_status(&task_id, TaskStatus::Running, Some("w"), None)
            .unwrap();
        scheduler
            .store
            .update_task_status(&task_id, TaskStatus::Completed, None, None)
            .unwrap();
        scheduler.tick().await;

        {
            let jobs = scheduler.jobs.lock();
            let health = jobs.get("system_health").unwrap();
            assert_eq!(health.failure_count, 0);
            assert_eq!(health.run_count, 1);
            assert!(health.last_run.is_some());
        }

        // Now fail it max_failures times in a row.
        for _ in 0..3 {
            {
                let mut jobs = scheduler.jobs.lock();
                let health = jobs.get_mut("system_health").unwrap();
                health.next_run = Some(Local::now() - chrono::Duration::minutes(1));
            }
            scheduler.tick().await;
            let task_id = scheduler.in_flight.lock().keys().next().cloned().unwrap();
            scheduler
                .store
                .update_task_status(&task_id, TaskStatus::Running, Some("w"), None)
                .unwrap();
            scheduler
                .store
                .update_task_status(
                    &task_id,
                    TaskStatus::Failed,
                    None,
                    Some(&json!({"error": "boom"})),
                )
                .unwrap();
            scheduler.tick().await;
        }

        let jobs = scheduler.jobs.lock();
        let health = jobs.get("system_health").unwrap();
        assert!(!health.enabled, "job should disable after max failures");
        assert!(health.next_run.is_none());
    }

    #[tokio::test]
    async fn running_type_conflict_defers_the_job() {
        let (scheduler, _dispatcher, _dir) = test_scheduler();
        // A running task of the same type blocks the scheduler path.
        scheduler
            .store
            .create_task("busy", "test", &json!({}), None, 600)
            .unwrap();
        scheduler
            .store
            .update_task_status("busy", TaskStatus::Running, Some("w"), None)
            .unwrap();

        {
            let mut jobs = scheduler.jobs.lock();
            for job in jobs.values_mut() {
                job.enabled = false;
            }
            let health = jobs.get_mut("system_health").unwrap();
            health.enabled = true;
            health.next_run = Some(Local::now() - chrono::Duration::minutes(1));
        }

        scheduler.tick().await;
        // Only the pre-existing task is in the table.
        assert_eq!(scheduler.store.get_tasks(&[], 50, 0).unwrap().len(), 1);
        // The job stays due for the next tick.
        let jobs = scheduler.jobs.lock();
        assert!(jobs.get("system_health").unwrap().next_run.unwrap() <= Local::now());
    }

    #[test]
    fn next_scheduled_load_tracks_the_vacancy_job() {
        let (scheduler, _dispatcher, _dir) = test_scheduler();
        let next = scheduler.next_scheduled_load().unwrap();
        let jobs = scheduler.jobs_snapshot();
        let vacancy_job = &jobs
            .iter()
            .find(|(k, _)| k == "hourly_vacancy_load")
            .unwrap()
            .1;
        assert_eq!(Some(next), vacancy_job.next_run);
    }
}
