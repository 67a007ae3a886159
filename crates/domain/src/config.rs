//! Engine configuration: `config/config_v4.json` modelled with serde,
//! atomic writes with timestamped backups, and startup validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default config path relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/config_v4.json";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub task_dispatcher: DispatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub system_monitoring: MonitoringConfig,
    #[serde(default)]
    pub web_interface: WebConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub hosts: HostsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "d_db_path")]
    pub path: PathBuf,
    /// How long a reader may wait on a locked database before erroring.
    #[serde(default = "d_30")]
    pub busy_timeout_sec: u64,
    #[serde(default = "d_true")]
    pub wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: d_db_path(),
            busy_timeout_sec: 30,
            wal: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "d_3")]
    pub max_workers: usize,
    /// Records per chunk; one page carries up to 100 records.
    #[serde(default = "d_500")]
    pub chunk_size: usize,
    #[serde(default = "d_3600")]
    pub default_timeout_sec: i64,
    #[serde(default = "d_1")]
    pub frequency_hours: u32,
    /// When set the dispatcher refuses to claim new tasks.
    #[serde(default)]
    pub frozen: bool,
    /// Seconds to wait for in-flight tasks on shutdown.
    #[serde(default = "d_30")]
    pub shutdown_grace_sec: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            chunk_size: 500,
            default_timeout_sec: 3600,
            frequency_hours: 1,
            frozen: false,
            shutdown_grace_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "d_level")]
    pub level: String,
    #[serde(default = "d_log_file")]
    pub file: PathBuf,
    #[serde(default = "d_100")]
    pub rotation_mb: u64,
    #[serde(default = "d_3u32")]
    pub backups: u32,
    #[serde(default = "d_true")]
    pub console: bool,
    /// Mirror WARN+ records into the `logs` table.
    #[serde(default)]
    pub database: bool,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: d_level(),
            file: d_log_file(),
            rotation_mb: 100,
            backups: 3,
            console: true,
            database: false,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_user_agent")]
    pub user_agent: String,
    #[serde(default = "d_4")]
    pub max_retries: u32,
    /// Minimum seconds between outbound requests (per fetcher instance).
    #[serde(default = "d_1f")]
    pub rate_limit_delay_sec: f64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            user_agent: d_user_agent(),
            max_retries: 4,
            rate_limit_delay_sec: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "d_80f")]
    pub cpu_threshold: f64,
    #[serde(default = "d_85f")]
    pub memory_threshold: f64,
    #[serde(default = "d_90f")]
    pub disk_threshold: f64,
    #[serde(default = "d_300")]
    pub interval_sec: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 80.0,
            memory_threshold: 85.0,
            disk_threshold: 90.0,
            interval_sec: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_true")]
    pub auto_start: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8088,
            auto_start: true,
        }
    }
}

/// Notification credentials only — delivery lives outside the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "d_30u32")]
    pub days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { days: 30 }
    }
}

/// Downstream host stubs (analytics / LLM). The engine only tracks the
/// enabled flags and connection blobs; the clients themselves are external.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostsConfig {
    #[serde(default)]
    pub host2: HostEntry,
    #[serde(default)]
    pub host3: HostEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostEntry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub connection: serde_json::Value,
}

// ── serde defaults ────────────────────────────────────────────────────

fn d_db_path() -> PathBuf {
    PathBuf::from("data/vacancies_v4.sqlite3")
}
fn d_log_file() -> PathBuf {
    PathBuf::from("logs/app.log")
}
fn d_level() -> String {
    "info".into()
}
fn d_base_url() -> String {
    "https://api.hh.ru".into()
}
fn d_user_agent() -> String {
    "VacHarvest/0.4 (+https://example.local)".into()
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8088
}
fn d_1() -> u32 {
    1
}
fn d_3() -> usize {
    3
}
fn d_3u32() -> u32 {
    3
}
fn d_4() -> u32 {
    4
}
fn d_30() -> u64 {
    30
}
fn d_30u32() -> u32 {
    30
}
fn d_100() -> u64 {
    100
}
fn d_300() -> u64 {
    300
}
fn d_500() -> usize {
    500
}
fn d_3600() -> i64 {
    3600
}
fn d_1f() -> f64 {
    1.0
}
fn d_80f() -> f64 {
    80.0
}
fn d_85f() -> f64 {
    85.0
}
fn d_90f() -> f64 {
    90.0
}
fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Load / save / validate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Read the config from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Atomically replace the config file: the previous copy is preserved
    /// as `<name>.bak.<YYYYMMDDHHMMSS>` next to it, the new content is
    /// written to a temp file and renamed into place.
    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(self)?;
        write_with_backup(path, &json)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let warn = |msg: String| ConfigIssue {
            severity: ConfigSeverity::Warning,
            message: msg,
        };
        let err = |msg: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            message: msg,
        };

        if self.task_dispatcher.max_workers == 0 {
            issues.push(err("task_dispatcher.max_workers must be at least 1".into()));
        }
        if self.task_dispatcher.max_workers > 16 {
            issues.push(warn(format!(
                "task_dispatcher.max_workers = {} risks an upstream ban",
                self.task_dispatcher.max_workers
            )));
        }
        if self.task_dispatcher.chunk_size < 100 {
            issues.push(warn("task_dispatcher.chunk_size below one page (100)".into()));
        }
        if self.api.base_url.is_empty() {
            issues.push(err("api.base_url is empty".into()));
        }
        for (name, v) in [
            ("cpu_threshold", self.system_monitoring.cpu_threshold),
            ("memory_threshold", self.system_monitoring.memory_threshold),
            ("disk_threshold", self.system_monitoring.disk_threshold),
        ] {
            if !(0.0..=100.0).contains(&v) {
                issues.push(err(format!("system_monitoring.{name} = {v} is not a percentage")));
            }
        }
        if self.telegram.enabled && self.telegram.token.is_none() {
            issues.push(warn("telegram.enabled without telegram.token".into()));
        }
        issues
    }
}

/// Write `content` to `path` atomically, backing up the previous file.
/// Returns the backup path when one was made.
pub fn write_with_backup(path: &Path, content: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut backup = PathBuf::new();
    if path.exists() {
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        backup = PathBuf::from(format!("{}.bak.{stamp}", path.display()));
        std::fs::copy(path, &backup)?;
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(backup)
}
