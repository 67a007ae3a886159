//! Bounded worker pool over the durable task queue.
//!
//! Workers consume an in-process channel fed by a monitor loop that scans
//! the store for due tasks every ~10 seconds (or immediately after
//! `add_task`). The monitor also fails tasks that overran their timeout
//! and enforces the one-running-task-per-type rule for scheduler-created
//! tasks. Shutdown stops claiming, waits out the grace period, and marks
//! whatever is still in flight as cancelled.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use vh_auth::AuthRegistry;
use vh_domain::config::Config;
use vh_domain::task::{TaskRecord, TaskStatus};
use vh_domain::{Error, Result};
use vh_store::Store;

use crate::handlers::{self, HandlerContext};
use crate::monitor::SystemMonitor;

/// How long a worker blocks on the queue before re-checking shutdown.
const WORKER_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
pub struct CurrentTask {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub started_at: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatus {
    pub running: bool,
    pub frozen: bool,
    pub workers_count: usize,
    pub queue_depth: usize,
    pub current_tasks: HashMap<String, CurrentTask>,
}

pub struct Dispatcher {
    store: Arc<Store>,
    config: Arc<Config>,
    auth: Arc<AuthRegistry>,
    monitor: Arc<SystemMonitor>,
    filters_path: PathBuf,

    queue_tx: mpsc::Sender<TaskRecord>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<TaskRecord>>,
    /// Ids currently enqueued or executing, to keep the monitor from
    /// double-feeding a pending task between scans.
    in_flight: Mutex<HashSet<String>>,
    current: Mutex<HashMap<String, CurrentTask>>,
    queue_depth: AtomicUsize,

    running: AtomicBool,
    frozen: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    wake: Notify,
    handles: Mutex<Vec<JoinHandle<()>>>,

    /// Monitor scan cadence; shortened in tests.
    tick_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        config: Arc<Config>,
        auth: Arc<AuthRegistry>,
        monitor: Arc<SystemMonitor>,
        filters_path: PathBuf,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.task_dispatcher.max_workers.max(1) * 4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let frozen = config.task_dispatcher.frozen;
        Self {
            store,
            config,
            auth,
            monitor,
            filters_path,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            in_flight: Mutex::new(HashSet::new()),
            current: Mutex::new(HashMap::new()),
            queue_depth: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            frozen: AtomicBool::new(frozen),
            shutdown_tx,
            shutdown_rx,
            wake: Notify::new(),
            handles: Mutex::new(Vec::new()),
            tick_interval: Duration::from_secs(10),
        }
    }

    /// Start the worker pool and the monitor loop.
    pub fn spawn(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut handles = Vec::new();
        for i in 0..self.config.task_dispatcher.max_workers {
            let dispatcher = self.clone();
            let worker_id = format!("worker-{i}");
            handles.push(tokio::spawn(async move {
                dispatcher.worker_loop(worker_id).await;
            }));
        }
        let dispatcher = self.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.monitor_loop().await;
        }));
        tracing::info!(
            workers = self.config.task_dispatcher.max_workers,
            "dispatcher started"
        );
        *self.handles.lock() = handles;
    }

    /// Create a task. Due tasks are picked up on the next monitor pass,
    /// which is nudged immediately.
    pub fn add_task(
        &self,
        kind: &str,
        params: Value,
        schedule_at: Option<f64>,
        timeout_sec: Option<i64>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let timeout = timeout_sec.unwrap_or(self.config.task_dispatcher.default_timeout_sec);
        self.store.create_task(&id, kind, &params, schedule_at, timeout)?;
        self.wake.notify_one();
        Ok(id)
    }

    /// Progress view for one task (status, progress, result).
    pub fn get_progress(&self, id: &str) -> Result<Option<Value>> {
        let Some(task) = self.store.get_task(id)? else {
            return Ok(None);
        };
        Ok(Some(json!({
            "task_id": task.id,
            "status": task.status,
            "progress": task.progress.unwrap_or(Value::Null),
            "result": task.result.unwrap_or(Value::Null),
            "created_at": task.created_at,
            "started_at": task.started_at,
            "finished_at": task.finished_at,
        })))
    }

    pub fn get_status(&self) -> DispatcherStatus {
        DispatcherStatus {
            running: self.running.load(Ordering::SeqCst),
            frozen: self.frozen.load(Ordering::SeqCst),
            workers_count: self.config.task_dispatcher.max_workers,
            queue_depth: self.queue_depth.load(Ordering::SeqCst),
            current_tasks: self.current.lock().clone(),
        }
    }

    /// Freeze/unfreeze claiming. Running tasks are unaffected.
    pub fn set_frozen(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::SeqCst);
        tracing::info!(frozen, "dispatcher freeze flag changed");
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Stop claiming, wait out the grace period, cancel the stragglers.
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.config.task_dispatcher.shutdown_grace_sec);
        tracing::info!(grace_sec = grace.as_secs(), "dispatcher shutting down");
        let _ = self.shutdown_tx.send(true);
        self.running.store(false, Ordering::SeqCst);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let drained = futures_util::future::join_all(handles);
        if tokio::time::timeout(grace, drained).await.is_err() {
            tracing::warn!("grace period elapsed with tasks still in flight");
        }

        let leftover: Vec<CurrentTask> = self.current.lock().values().cloned().collect();
        for task in leftover {
            tracing::warn!(task_id = %task.task_id, "cancelling in-flight task");
            let _ = self.store.update_task_status(
                &task.task_id,
                TaskStatus::Cancelled,
                None,
                Some(&json!({"error": "cancelled during shutdown"})),
            );
        }
        tracing::info!("dispatcher stopped");
    }

    // ── Worker loop ───────────────────────────────────────────────────

    async fn worker_loop(self: Arc<Self>, worker_id: String) {
        tracing::debug!(worker = %worker_id, "worker started");
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            let task = {
                let mut rx = self.queue_rx.lock().await;
                match tokio::time::timeout(WORKER_POLL, rx.recv()).await {
                    Ok(Some(task)) => task,
                    Ok(None) => break,
                    Err(_) => continue,
                }
            };
            self.queue_depth.fetch_sub(1, Ordering::SeqCst);
            self.execute(&worker_id, task).await;
        }
        tracing::debug!(worker = %worker_id, "worker stopped");
    }

    async fn execute(&self, worker_id: &str, task: TaskRecord) {
        // The task may have been cancelled or timed out while queued.
        match self.store.get_task(&task.id) {
            Ok(Some(fresh)) if fresh.status == TaskStatus::Pending => {}
            _ => {
                self.in_flight.lock().remove(&task.id);
                return;
            }
        }

        if let Err(e) =
            self.store
                .update_task_status(&task.id, TaskStatus::Running, Some(worker_id), None)
        {
            tracing::error!(task_id = %task.id, error = %e, "failed to claim task");
            self.in_flight.lock().remove(&task.id);
            return;
        }
        self.current.lock().insert(
            worker_id.to_string(),
            CurrentTask {
                task_id: task.id.clone(),
                kind: task.kind.clone(),
                started_at: chrono::Utc::now().timestamp() as f64,
            },
        );
        tracing::info!(worker = %worker_id, task_id = %task.id, kind = %task.kind, "task started");

        let ctx = HandlerContext {
            store: self.store.clone(),
            config: self.config.clone(),
            auth: self.auth.clone(),
            monitor: self.monitor.clone(),
            filters_path: self.filters_path.clone(),
            shutdown: self.shutdown_rx.clone(),
        };

        let outcome = handlers::run_task(&ctx, &task).await;
        match outcome {
            Ok(result) => {
                let _ = self.store.update_task_status(
                    &task.id,
                    TaskStatus::Completed,
                    None,
                    Some(&result),
                );
                tracing::info!(task_id = %task.id, "task completed");
            }
            Err(Error::TaskCancelled) => {
                let _ = self.store.update_task_status(
                    &task.id,
                    TaskStatus::Cancelled,
                    None,
                    Some(&json!({"error": "cancelled during shutdown"})),
                );
                tracing::info!(task_id = %task.id, "task cancelled");
            }
            Err(e) => {
                let _ = self.store.update_task_status(
                    &task.id,
                    TaskStatus::Failed,
                    None,
                    Some(&json!({"error": e.to_string()})),
                );
                tracing::error!(task_id = %task.id, error = %e, "task failed");
            }
        }

        self.current.lock().remove(worker_id);
        self.in_flight.lock().remove(&task.id);
    }

    // ── Monitor loop ──────────────────────────────────────────────────

    async fn monitor_loop(self: Arc<Self>) {
        loop {
            let _ = tokio::time::timeout(self.tick_interval, self.wake.notified()).await;
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.fail_timed_out_tasks();
            if !self.is_frozen() {
                self.enqueue_due_tasks().await;
            }
        }
    }

    fn fail_timed_out_tasks(&self) {
        let timed_out = match self.store.get_timed_out_tasks() {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "timeout scan failed");
                return;
            }
        };
        let now = chrono::Utc::now().timestamp() as f64;
        for task in timed_out {
            let elapsed = now - task.started_at.unwrap_or(now);
            tracing::warn!(
                task_id = %task.id,
                elapsed_sec = elapsed as i64,
                timeout_sec = task.timeout_sec,
                "task timed out"
            );
            let _ = self.store.update_task_status(
                &task.id,
                TaskStatus::Failed,
                None,
                Some(&json!({
                    "error": format!("Timeout after {elapsed:.1}s (limit {}s)", task.timeout_sec)
                })),
            );
            self.in_flight.lock().remove(&task.id);
        }
    }

    async fn enqueue_due_tasks(&self) {
        let limit = self.config.task_dispatcher.max_workers * 2;
        let due = match self.store.claim_due(limit) {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "due-task scan failed");
                return;
            }
        };

        for task in due {
            if self.in_flight.lock().contains(&task.id) {
                continue;
            }
            // Scheduler-created tasks run at most one per type; operator
            // one-shots bypass the rule.
            let scheduled = task
                .params
                .as_ref()
                .and_then(|p| p.get("scheduled"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if scheduled {
                match self.store.count_running_of_type(&task.kind) {
                    Ok(0) => {}
                    Ok(_) => {
                        tracing::debug!(task_id = %task.id, kind = %task.kind, "type already running, deferring");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "conflict check failed");
                        continue;
                    }
                }
            }

            self.in_flight.lock().insert(task.id.clone());
            self.queue_depth.fetch_add(1, Ordering::SeqCst);
            let task_id = task.id.clone();
            if self.queue_tx.send(task).await.is_err() {
                tracing::warn!("work queue closed, monitor exiting");
                self.in_flight.lock().remove(&task_id);
                self.queue_depth.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
