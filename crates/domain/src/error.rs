/// Shared error type used across all VacHarvest crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection-level HTTP failure (timeout, DNS, reset).
    #[error("transport: {0}")]
    Transport(String),

    /// Upstream answered with a 4xx status.
    #[error("upstream rejected request (HTTP {status})")]
    UpstreamRejected { status: u16 },

    /// Upstream answered with a 5xx status.
    #[error("upstream server error (HTTP {status})")]
    UpstreamServer { status: u16 },

    #[error("task timed out after {elapsed_sec:.1}s (limit {timeout_sec}s)")]
    TaskTimeout { elapsed_sec: f64, timeout_sec: i64 },

    #[error("task cancelled")]
    TaskCancelled,

    /// A task handler failed; the message carries the stringified cause.
    #[error("handler: {0}")]
    Handler(String),

    #[error("config: {0}")]
    Config(String),

    #[error("store: {0}")]
    Store(String),

    #[error("auth: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error is worth another attempt against the upstream.
    /// 401/403 are retryable because the caller rotates auth first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::UpstreamServer { .. } => true,
            Error::UpstreamRejected { status } => matches!(status, 429 | 401 | 403),
            _ => false,
        }
    }
}
