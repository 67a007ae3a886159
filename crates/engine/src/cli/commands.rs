//! CLI command implementations. Each returns the process exit code:
//! 0 = ok, 1 = error, 2 = completed with warnings.

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;

use vh_domain::config::Config;
use vh_domain::filter::FiltersFile;
use vh_domain::task::TaskStatus;
use vh_store::processes::{pid_alive, PROCESS_SCHEDULER_DAEMON};
use vh_store::Store;

use crate::cli::OutputFormat;
use crate::monitor::SystemMonitor;
use crate::server::EnginePaths;

pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_WARNINGS: i32 = 2;

fn open_store(config: &Config) -> anyhow::Result<Store> {
    Store::open(&config.database).context("opening database")
}

fn format_ts(ts: Option<f64>) -> String {
    ts.and_then(|t| chrono::DateTime::from_timestamp(t as i64, 0))
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "-".into())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// load-vacancies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn load_vacancies(
    config: &Config,
    paths: &EnginePaths,
    filter_id: Option<String>,
    max_pages: Option<u32>,
    schedule_at: Option<f64>,
) -> anyhow::Result<i32> {
    let store = open_store(config)?;
    let filters = FiltersFile::load(&paths.filters_path)?;

    let selected: Vec<_> = match &filter_id {
        Some(id) => match filters.get(id) {
            Some(f) => vec![f.clone()],
            None => {
                eprintln!("error: unknown filter id: {id}");
                return Ok(EXIT_ERROR);
            }
        },
        None => filters.active().cloned().collect(),
    };
    if selected.is_empty() {
        eprintln!("error: no active filters configured in {}", paths.filters_path.display());
        return Ok(EXIT_ERROR);
    }

    for filter in &selected {
        let mut params = json!({"filter": filter});
        if let Some(pages) = max_pages {
            params["max_pages"] = json!(pages);
        }
        let id = uuid::Uuid::new_v4().to_string();
        store.create_task(
            &id,
            "load_vacancies",
            &params,
            schedule_at,
            config.task_dispatcher.default_timeout_sec,
        )?;
        match schedule_at {
            Some(at) => println!(
                "scheduled load task {id} (filter {}) for {}",
                filter.id,
                format_ts(Some(at))
            ),
            None => println!("created load task {id} (filter {})", filter.id),
        }
    }
    Ok(EXIT_OK)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// tasks / task-info / status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn tasks(config: &Config, status: Option<String>, limit: usize) -> anyhow::Result<i32> {
    let store = open_store(config)?;

    let mut statuses = Vec::new();
    if let Some(raw) = &status {
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match TaskStatus::parse(part) {
                Some(s) => statuses.push(s),
                None => {
                    eprintln!("error: unknown task status: {part}");
                    return Ok(EXIT_ERROR);
                }
            }
        }
    }

    let tasks = store.get_tasks(&statuses, limit, 0)?;
    if tasks.is_empty() {
        println!("no tasks found");
        return Ok(EXIT_OK);
    }

    println!(
        "{:<36}  {:<17}  {:<10}  {:<19}  {}",
        "ID", "TYPE", "STATUS", "CREATED", "WORKER"
    );
    for task in &tasks {
        println!(
            "{:<36}  {:<17}  {:<10}  {:<19}  {}",
            task.id,
            task.kind,
            task.status.as_str(),
            format_ts(Some(task.created_at)),
            task.worker_id.as_deref().unwrap_or("-"),
        );
    }
    Ok(EXIT_OK)
}

pub fn task_info(config: &Config, id: &str) -> anyhow::Result<i32> {
    let store = open_store(config)?;
    match store.get_task(id)? {
        Some(task) => {
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(EXIT_OK)
        }
        None => {
            eprintln!("error: task not found: {id}");
            Ok(EXIT_ERROR)
        }
    }
}

pub fn status(config: &Config) -> anyhow::Result<i32> {
    let store = open_store(config)?;

    let pending = store.get_tasks(&[TaskStatus::Pending], 500, 0)?.len();
    let running = store.get_tasks(&[TaskStatus::Running], 500, 0)?.len();

    let mut exit = EXIT_OK;
    match store.get_process(PROCESS_SCHEDULER_DAEMON)? {
        Some(record) if record.status == "running" && pid_alive(record.pid) => {
            println!("daemon:   running (pid {})", record.pid);
        }
        Some(record) if record.status == "running" => {
            println!("daemon:   stale (pid {} is gone)", record.pid);
            exit = EXIT_WARNINGS;
        }
        Some(record) => println!("daemon:   {}", record.status),
        None => println!("daemon:   not registered"),
    }
    println!("pending:  {pending}");
    println!("running:  {running}");
    println!(
        "workers:  {} configured{}",
        config.task_dispatcher.max_workers,
        if config.task_dispatcher.frozen {
            " (frozen)"
        } else {
            ""
        }
    );
    println!("database: {} ({:.1} MB)", config.database.path.display(), store.database_size_mb());
    Ok(exit)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// stats / system / filters / hosts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn stats(config: &Config, days: u32, format: OutputFormat) -> anyhow::Result<i32> {
    let store = open_store(config)?;
    let stats = store.get_stats()?;
    let changes = store.get_combined_changes_stats(days)?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({"stats": stats, "changes": changes}))?
            );
        }
        OutputFormat::Table => {
            println!("tasks (24h):");
            if stats.tasks.is_empty() {
                println!("  none");
            }
            let mut task_rows: Vec<_> = stats.tasks.iter().collect();
            task_rows.sort();
            for (status, count) in task_rows {
                println!("  {status:<10} {count}");
            }
            println!("vacancies:");
            println!("  total      {}", stats.vacancies.total);
            println!("  processed  {}", stats.vacancies.processed);
            println!("  today      {}", stats.vacancies.today);
            println!(
                "  last run   {} (+{})",
                stats.vacancies.last_run_at.as_deref().unwrap_or("-"),
                stats.vacancies.added_last_run_10m_window
            );
            println!("changes ({days}d):");
            println!(
                "  new        {}",
                changes["vacancies"]["new_vacancies"]
            );
            println!(
                "  updated    {}",
                changes["vacancies"]["updated_in_place"]
            );
            println!("  employers  {}", changes["employers"]["total_changes"]);
        }
    }
    Ok(EXIT_OK)
}

pub async fn system(
    config: &Config,
    detailed: bool,
    alerts_only: bool,
    json_format: bool,
) -> anyhow::Result<i32> {
    let store = Arc::new(open_store(config)?);
    let monitor = SystemMonitor::new(config.system_monitoring.clone(), store);
    let metrics = monitor.sample().await;

    let has_alerts = !metrics.alerts.is_empty();
    if json_format {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        if !alerts_only {
            println!("status:  {}", metrics.overall_status);
            println!("cpu:     {:.1}%", metrics.cpu_percent);
            println!("memory:  {:.1}%", metrics.memory_percent);
            println!("disk:    {:.1}%", metrics.disk_percent);
            if detailed {
                println!("db size: {:.1} MB", metrics.database_size_mb);
                println!("active:  {} tasks", metrics.active_tasks);
            }
        }
        if has_alerts {
            println!("alerts:");
            for alert in &metrics.alerts {
                println!("  [{}] {}", alert.level, alert.message);
            }
        } else if alerts_only {
            println!("no alerts");
        }
    }

    Ok(if has_alerts { EXIT_WARNINGS } else { EXIT_OK })
}

pub fn filters(paths: &EnginePaths) -> anyhow::Result<i32> {
    let file = FiltersFile::load(&paths.filters_path)?;
    if file.filters.is_empty() {
        println!("no filters configured in {}", paths.filters_path.display());
        return Ok(EXIT_OK);
    }
    println!("{:<16}  {:<8}  {:<24}  {}", "ID", "ACTIVE", "NAME", "PARAMS");
    for f in &file.filters {
        println!(
            "{:<16}  {:<8}  {:<24}  {}",
            f.id,
            if f.is_active() { "yes" } else { "no" },
            f.name,
            serde_json::to_string(&f.params)?,
        );
    }
    Ok(EXIT_OK)
}

pub fn hosts(
    config: &Config,
    paths: &EnginePaths,
    host: Option<String>,
    enable: bool,
    disable: bool,
) -> anyhow::Result<i32> {
    if let Some(name) = host {
        if !enable && !disable {
            eprintln!("error: --host requires --enable or --disable");
            return Ok(EXIT_ERROR);
        }
        let mut updated = config.clone();
        let entry = match name.as_str() {
            "host2" => &mut updated.hosts.host2,
            "host3" => &mut updated.hosts.host3,
            other => {
                eprintln!("error: unknown host: {other}");
                return Ok(EXIT_ERROR);
            }
        };
        entry.enabled = enable;
        updated.save(&paths.config_path)?;
        println!("{name} {}", if enable { "enabled" } else { "disabled" });
        return Ok(EXIT_OK);
    }

    println!("host1: active   (sqlite, primary storage)");
    println!(
        "host2: {} (analytics sync)",
        if config.hosts.host2.enabled { "enabled " } else { "disabled" }
    );
    println!(
        "host3: {} (AI analysis)",
        if config.hosts.host3.enabled { "enabled " } else { "disabled" }
    );
    Ok(EXIT_OK)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// daemon / cleanup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn daemon_start_background(config_path: &std::path::Path) -> anyhow::Result<i32> {
    let exe = std::env::current_exe().context("resolving executable path")?;
    let child = std::process::Command::new(exe)
        .arg("--config")
        .arg(config_path)
        .arg("start")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("spawning daemon")?;
    println!("daemon started (pid {})", child.id());
    Ok(EXIT_OK)
}

pub fn daemon_stop(config: &Config) -> anyhow::Result<i32> {
    let store = open_store(config)?;
    if store.kill_process(PROCESS_SCHEDULER_DAEMON)? {
        println!("daemon stopped");
        Ok(EXIT_OK)
    } else {
        eprintln!("daemon is not running");
        Ok(EXIT_ERROR)
    }
}

pub fn daemon_status(config: &Config, paths: &EnginePaths) -> anyhow::Result<i32> {
    let store = open_store(config)?;
    let registry = store.get_process(PROCESS_SCHEDULER_DAEMON)?;
    let file_pid = crate::pid::read_pid_file(&paths.pid_path);

    match registry {
        Some(record) if record.status == "running" && pid_alive(record.pid) => {
            println!("daemon running (pid {})", record.pid);
            Ok(EXIT_OK)
        }
        Some(record) if record.status == "running" => {
            // Registry says running but the pid is gone — stale row.
            store.cleanup_dead_processes()?;
            println!("daemon stale (pid {} is gone), row reconciled", record.pid);
            Ok(EXIT_WARNINGS)
        }
        _ => match file_pid {
            Some(pid) if pid_alive(i64::from(pid)) => {
                println!("daemon running per pid file (pid {pid}), registry out of date");
                Ok(EXIT_WARNINGS)
            }
            _ => {
                println!("daemon not running");
                Ok(EXIT_ERROR)
            }
        },
    }
}

pub fn daemon_restart(config: &Config, paths: &EnginePaths) -> anyhow::Result<i32> {
    let store = open_store(config)?;
    if store.kill_process(PROCESS_SCHEDULER_DAEMON)? {
        println!("daemon stopped");
    }
    daemon_start_background(&paths.config_path)
}

pub fn cleanup(config: &Config, days: Option<u32>, dry_run: bool) -> anyhow::Result<i32> {
    let store = open_store(config)?;
    let days = days.unwrap_or(config.cleanup.days);

    if dry_run {
        let candidates = store.count_cleanup_candidates(days)?;
        println!("would delete {candidates} terminal task(s) older than {days} day(s)");
        return Ok(EXIT_OK);
    }

    let report = store.cleanup_old_tasks(days, true)?;
    println!(
        "deleted {} terminal task(s) older than {} day(s)",
        report.cleaned_count, report.days_kept
    );
    Ok(EXIT_OK)
}
