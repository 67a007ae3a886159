//! Tracing setup: console + file output per config, size-based rotation,
//! and an optional database sink mirroring WARN+ events into the `logs`
//! table.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use vh_domain::config::LoggingConfig;
use vh_store::Store;

/// Install the global subscriber. `store` enables the database sink when
/// `logging.database` is set.
pub fn init(config: &LoggingConfig, store: Option<Arc<Store>>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let console_layer = config.console.then(|| {
        if config.json {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        }
    });

    let file_layer = match open_log_file(config) {
        Ok(file) => Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .boxed(),
        ),
        Err(e) => {
            eprintln!("warning: log file unavailable: {e}");
            None
        }
    };

    let db_layer = match (config.database, store) {
        (true, Some(store)) => Some(DbLogLayer { store }),
        _ => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .with(db_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;
    Ok(())
}

fn open_log_file(config: &LoggingConfig) -> anyhow::Result<Arc<std::fs::File>> {
    if let Some(parent) = config.file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    rotate_if_needed(&config.file, config.rotation_mb, config.backups)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)?;
    Ok(Arc::new(file))
}

/// Shift `app.log` → `app.log.1` → … → `app.log.N` once the active file
/// exceeds the rotation size. The oldest backup falls off the end.
pub fn rotate_if_needed(path: &Path, rotation_mb: u64, backups: u32) -> std::io::Result<()> {
    let Ok(meta) = std::fs::metadata(path) else {
        return Ok(());
    };
    if meta.len() < rotation_mb.saturating_mul(1024 * 1024) {
        return Ok(());
    }

    let backup = |n: u32| format!("{}.{n}", path.display());
    if backups == 0 {
        return std::fs::remove_file(path);
    }
    let _ = std::fs::remove_file(backup(backups));
    for n in (1..backups).rev() {
        let _ = std::fs::rename(backup(n), backup(n + 1));
    }
    std::fs::rename(path, backup(1))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mirrors WARN and ERROR events into the `logs` table. The store's log
/// path swallows its own failures, so a broken database cannot recurse
/// into more logging.
struct DbLogLayer {
    store: Arc<Store>,
}

impl<S: Subscriber> Layer<S> for DbLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        let context = if visitor.fields.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(visitor.fields))
        };
        self.store.write_log_record(
            meta.level().as_str(),
            meta.target(),
            meta.name(),
            &visitor.message,
            context.as_ref(),
        );
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(format!("{value:?}")),
            );
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
    }
}
