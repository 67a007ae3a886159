use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use vh_domain::config::{Config, DEFAULT_CONFIG_PATH};
use vh_store::Store;

use vh_engine::cli::{commands, Cli, Command, DaemonCommand};
use vh_engine::logging;
use vh_engine::server::{self, EnginePaths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&config_path)?;
    let paths = EnginePaths {
        config_path: config_path.clone(),
        ..EnginePaths::default()
    };

    let code = match cli.command {
        // Default to the foreground engine when no subcommand is given.
        None => run_engine(config, paths, None, None).await?,
        Some(Command::Start {
            workers,
            chunk_size,
        }) => run_engine(config, paths, workers, chunk_size).await?,
        Some(Command::Daemon(DaemonCommand::Start { background: false })) => {
            run_engine(config, paths, None, None).await?
        }

        Some(Command::LoadVacancies {
            filter_id,
            max_pages,
            schedule_at,
        }) => commands::load_vacancies(&config, &paths, filter_id, max_pages, schedule_at)?,
        Some(Command::Tasks { status, limit }) => commands::tasks(&config, status, limit)?,
        Some(Command::TaskInfo { id }) => commands::task_info(&config, &id)?,
        Some(Command::Status) => commands::status(&config)?,
        Some(Command::Stats { days, format }) => commands::stats(&config, days, format)?,
        Some(Command::System {
            detailed,
            alerts_only,
            json,
        }) => commands::system(&config, detailed, alerts_only, json).await?,
        Some(Command::Filters) => commands::filters(&paths)?,
        Some(Command::Hosts {
            host,
            enable,
            disable,
        }) => commands::hosts(&config, &paths, host, enable, disable)?,
        Some(Command::Daemon(DaemonCommand::Start { background: true })) => {
            commands::daemon_start_background(&paths.config_path)?
        }
        Some(Command::Daemon(DaemonCommand::Stop)) => commands::daemon_stop(&config)?,
        Some(Command::Daemon(DaemonCommand::Status)) => commands::daemon_status(&config, &paths)?,
        Some(Command::Daemon(DaemonCommand::Restart)) => commands::daemon_restart(&config, &paths)?,
        Some(Command::Cleanup { days, dry_run }) => commands::cleanup(&config, days, dry_run)?,
        Some(Command::Version) => {
            println!("vacharvest {}", env!("CARGO_PKG_VERSION"));
            commands::EXIT_OK
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Foreground engine: open the store first so the database log sink can
/// attach, then install tracing and hand off to the server assembly.
async fn run_engine(
    mut config: Config,
    paths: EnginePaths,
    workers: Option<usize>,
    chunk_size: Option<usize>,
) -> anyhow::Result<i32> {
    if let Some(workers) = workers {
        config.task_dispatcher.max_workers = workers;
    }
    if let Some(chunk_size) = chunk_size {
        config.task_dispatcher.chunk_size = chunk_size;
    }

    let store = Arc::new(Store::open(&config.database).context("opening database")?);
    let log_store = config.logging.database.then(|| store.clone());
    logging::init(&config.logging, log_store)?;

    server::run(Arc::new(config), store, paths).await?;
    Ok(commands::EXIT_OK)
}
