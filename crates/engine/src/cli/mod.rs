pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// VacHarvest — a long-running acquisition service for a public
/// job-listing API.
#[derive(Debug, Parser)]
#[command(name = "vacharvest", version, about)]
pub struct Cli {
    /// Path to the engine config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the engine in the foreground (default when no subcommand is
    /// given): dispatcher, scheduler, and the web control surface.
    Start {
        /// Override the configured worker count.
        #[arg(long)]
        workers: Option<usize>,
        /// Override the configured chunk size (records per chunk).
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Enqueue vacancy load tasks.
    LoadVacancies {
        /// Load only this filter; default is every active filter.
        #[arg(long)]
        filter_id: Option<String>,
        /// Cap pages per filter.
        #[arg(long)]
        max_pages: Option<u32>,
        /// Run no earlier than this unix timestamp.
        #[arg(long)]
        schedule_at: Option<f64>,
    },
    /// List queued and finished tasks.
    Tasks {
        /// Comma-separated status set (pending,running,…).
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one task in full.
    TaskInfo { id: String },
    /// Engine status: daemon process, queue counters, freeze flag.
    Status,
    /// Task/vacancy statistics.
    Stats {
        /// Window for the change summary.
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// System metrics with threshold alerts.
    System {
        /// Include per-component detail.
        #[arg(long)]
        detailed: bool,
        /// Print alerts only.
        #[arg(long)]
        alerts_only: bool,
        /// JSON output.
        #[arg(long = "json-format")]
        json: bool,
    },
    /// List configured search filters.
    Filters,
    /// Downstream host stubs: show or toggle.
    Hosts {
        /// Host to modify (host2 | host3).
        #[arg(long)]
        host: Option<String>,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    /// Daemon lifecycle over the pid file and process registry.
    #[command(subcommand)]
    Daemon(DaemonCommand),
    /// Delete old terminal tasks.
    Cleanup {
        #[arg(long)]
        days: Option<u32>,
        /// Report what would be deleted without touching anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon.
    Start {
        /// Detach and return immediately.
        #[arg(long)]
        background: bool,
    },
    /// Stop a running daemon.
    Stop,
    /// Report daemon liveness.
    Status,
    /// Stop then start.
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}
