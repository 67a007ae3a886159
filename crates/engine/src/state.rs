use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use vh_auth::AuthRegistry;
use vh_domain::config::Config;
use vh_store::Store;

use crate::dispatcher::Dispatcher;
use crate::monitor::SystemMonitor;
use crate::scheduler::Scheduler;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Active config file, for the read/write endpoints.
    pub config_path: PathBuf,
    pub filters_path: PathBuf,
    pub store: Arc<Store>,
    pub auth: Arc<AuthRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<Scheduler>,
    pub monitor: Arc<SystemMonitor>,
    /// Serialized snapshot messages for WebSocket subscribers.
    pub events_tx: broadcast::Sender<String>,
}
