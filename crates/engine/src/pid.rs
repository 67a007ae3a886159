//! PID file management for daemon-style operation.
//!
//! On startup the daemon writes its PID to `data/scheduler_daemon.pid` and
//! acquires an `fs2` exclusive lock on the file. If another instance
//! already holds the lock, startup fails immediately. The lock (and file)
//! are released on shutdown via [`remove_pid_file`].

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

/// Default daemon pid file location.
pub const DAEMON_PID_PATH: &str = "data/scheduler_daemon.pid";

/// Write the current process PID to `path` and acquire an exclusive lock.
///
/// Returns the open [`File`] handle — the caller **must** keep it alive for
/// the lifetime of the daemon so the advisory lock is held.
///
/// # Errors
///
/// * Another process already holds the lock.
/// * Filesystem I/O failure.
pub fn write_pid_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .read(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("opening PID file {}: {e}", path.display()))?;

    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "another vacharvest daemon is running (PID file {} is locked)",
            path.display()
        )
    })?;

    let pid = std::process::id();
    {
        let mut f = &file;
        writeln!(f, "{pid}")?;
        f.flush()?;
    }

    tracing::info!(path = %path.display(), pid, "PID file written");
    Ok(file)
}

/// Remove the PID file. The lock is released when `_handle` drops; removing
/// the file keeps `daemon status` from reading a stale pid.
pub fn remove_pid_file(path: &Path, _handle: File) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Read the pid recorded in the file, if any.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("daemon.pid");

        let handle = write_pid_file(&pid_path).unwrap();
        assert_eq!(read_pid_file(&pid_path), Some(std::process::id()));

        // A second lock attempt fails while the first handle lives.
        assert!(write_pid_file(&pid_path).is_err());

        remove_pid_file(&pid_path, handle);
        assert!(!pid_path.exists());
        assert_eq!(read_pid_file(&pid_path), None);
    }

    #[test]
    fn creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("data").join("daemon.pid");
        let handle = write_pid_file(&pid_path).unwrap();
        assert!(pid_path.exists());
        remove_pid_file(&pid_path, handle);
    }
}
