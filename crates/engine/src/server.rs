//! Engine assembly: store, auth, dispatcher, scheduler, monitor, the
//! snapshot broadcaster, and the HTTP control surface, wired together
//! with pid-file + process-registry lifecycle and graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tokio::sync::{broadcast, watch};

use vh_auth::AuthRegistry;
use vh_domain::config::{Config, ConfigSeverity};
use vh_store::processes::{PROCESS_SCHEDULER_DAEMON, PROCESS_WEB_SERVER};
use vh_store::Store;

use crate::api;
use crate::dispatcher::Dispatcher;
use crate::monitor::{host_status, SystemMonitor};
use crate::pid;
use crate::scheduler::Scheduler;
use crate::state::AppState;

/// Where the engine's companion files live.
#[derive(Debug, Clone)]
pub struct EnginePaths {
    pub config_path: PathBuf,
    pub filters_path: PathBuf,
    pub auth_path: PathBuf,
    pub credentials_path: PathBuf,
    pub pid_path: PathBuf,
}

impl Default for EnginePaths {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(vh_domain::config::DEFAULT_CONFIG_PATH),
            filters_path: PathBuf::from(vh_domain::filter::DEFAULT_FILTERS_PATH),
            auth_path: PathBuf::from("config/auth_roles.json"),
            credentials_path: PathBuf::from("config/credentials.json"),
            pid_path: PathBuf::from(pid::DAEMON_PID_PATH),
        }
    }
}

/// Run the engine in the foreground until a shutdown signal arrives.
pub async fn run(config: Arc<Config>, store: Arc<Store>, paths: EnginePaths) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vacharvest starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── PID file + process registry ──────────────────────────────────
    let pid_file = pid::write_pid_file(&paths.pid_path)?;
    let cmdline: String = std::env::args().collect::<Vec<_>>().join(" ");
    store
        .register_process(PROCESS_SCHEDULER_DAEMON, std::process::id(), &cmdline, None, None)
        .context("registering daemon process")?;
    match store.cleanup_dead_processes() {
        Ok(0) => {}
        Ok(n) => tracing::info!(reconciled = n, "stale process rows marked dead"),
        Err(e) => tracing::warn!(error = %e, "process cleanup failed"),
    }

    // ── Auth registry ────────────────────────────────────────────────
    let auth = Arc::new(
        AuthRegistry::load(&paths.auth_path, &paths.credentials_path)
            .context("loading auth providers")?,
    );
    tracing::info!(
        providers = auth.provider_count(vh_auth::PURPOSE_DOWNLOAD),
        "auth registry ready"
    );

    // ── Monitor, dispatcher, scheduler ───────────────────────────────
    let monitor = Arc::new(SystemMonitor::new(
        config.system_monitoring.clone(),
        store.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        config.clone(),
        auth.clone(),
        monitor.clone(),
        paths.filters_path.clone(),
    ));
    dispatcher.spawn();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Scheduler::new(dispatcher.clone(), store.clone()));
    let scheduler_handle = scheduler.clone().spawn(shutdown_rx.clone());

    // ── Snapshot broadcaster (5s cadence) ────────────────────────────
    let (events_tx, _) = broadcast::channel::<String>(64);
    {
        let store = store.clone();
        let monitor = monitor.clone();
        let dispatcher = dispatcher.clone();
        let config = config.clone();
        let events_tx = events_tx.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.wait_for(|stop| *stop) => break,
                }
                if events_tx.receiver_count() == 0 {
                    continue;
                }
                if let Ok(stats) = store.get_stats() {
                    let status = dispatcher.get_status();
                    let _ = events_tx.send(
                        json!({
                            "type": "stats_update",
                            "data": {
                                "tasks": stats.tasks,
                                "vacancies": stats.vacancies,
                                "workers": {
                                    "active": status.current_tasks.len(),
                                    "configured": status.workers_count,
                                    "frozen": status.frozen,
                                },
                            },
                        })
                        .to_string(),
                    );
                }
                let metrics = monitor.sample().await;
                let _ = events_tx.send(
                    json!({
                        "type": "system_update",
                        "data": {
                            "metrics": metrics,
                            "hosts": host_status(&config.hosts),
                        },
                    })
                    .to_string(),
                );
            }
        });
    }

    let state = AppState {
        config: config.clone(),
        config_path: paths.config_path.clone(),
        filters_path: paths.filters_path.clone(),
        store: store.clone(),
        auth,
        dispatcher: dispatcher.clone(),
        scheduler,
        monitor,
        events_tx,
    };

    // ── HTTP control surface ─────────────────────────────────────────
    if config.web_interface.auto_start {
        let addr = format!(
            "{}:{}",
            config.web_interface.host, config.web_interface.port
        );
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding to {addr}"))?;
        store
            .register_process(
                PROCESS_WEB_SERVER,
                std::process::id(),
                &cmdline,
                Some(&config.web_interface.host),
                Some(config.web_interface.port),
            )
            .context("registering web process")?;
        tracing::info!(addr = %addr, "control surface listening");

        // Backpressure: cap concurrent HTTP requests.
        let app = api::router(state).layer(tower::limit::ConcurrencyLimitLayer::new(256));
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("http server error")?;
    } else {
        tracing::info!("web interface disabled, running headless");
        shutdown_signal().await;
    }

    // ── Teardown ─────────────────────────────────────────────────────
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    dispatcher.shutdown().await;
    let _ = scheduler_handle.await;

    if let Err(e) = store.mark_process_stopped(PROCESS_WEB_SERVER) {
        tracing::warn!(error = %e, "failed to mark web process stopped");
    }
    if let Err(e) = store.mark_process_stopped(PROCESS_SCHEDULER_DAEMON) {
        tracing::warn!(error = %e, "failed to mark daemon stopped");
    }
    pid::remove_pid_file(&paths.pid_path, pid_file);
    tracing::info!("vacharvest stopped");
    Ok(())
}

/// Resolves on SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
