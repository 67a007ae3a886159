//! Process registry and the database log sink.
//!
//! Long-running local processes (daemon, web server) register here with
//! their OS pid so restarts can detect stale instances. Liveness checks
//! use signal 0; divergence between the table and the OS is reconciled by
//! marking dead rows.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::{now_ts, Result, Store};

/// Logical name for the scheduler daemon row.
pub const PROCESS_SCHEDULER_DAEMON: &str = "scheduler_daemon";
/// Logical name for the web server row.
pub const PROCESS_WEB_SERVER: &str = "web_server";

#[derive(Debug, Clone, Serialize)]
pub struct ProcessRecord {
    pub name: String,
    pub pid: i64,
    pub start_time: f64,
    pub command_line: Option<String>,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub status: String,
}

impl Store {
    /// Upsert a process row as `running`.
    pub fn register_process(
        &self,
        name: &str,
        pid: u32,
        command_line: &str,
        host: Option<&str>,
        port: Option<u16>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let now = now_ts();
            conn.execute(
                "INSERT OR REPLACE INTO system_processes
                 (name, pid, start_time, command_line, host, port, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'running', ?7, ?8)",
                params![
                    name,
                    pid as i64,
                    now,
                    command_line,
                    host.unwrap_or("localhost"),
                    port.map(i64::from),
                    now,
                    now
                ],
            )?;
            Ok(())
        })?;
        tracing::info!(name, pid, "process registered");
        Ok(())
    }

    /// Pid of a process the registry believes is running.
    pub fn get_process_pid(&self, name: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT pid FROM system_processes WHERE name = ?1 AND status = 'running'",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    pub fn get_process(&self, name: &str) -> Result<Option<ProcessRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT name, pid, start_time, command_line, host, port, status
                     FROM system_processes WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok(ProcessRecord {
                            name: row.get(0)?,
                            pid: row.get(1)?,
                            start_time: row.get(2)?,
                            command_line: row.get(3)?,
                            host: row.get(4)?,
                            port: row.get(5)?,
                            status: row.get(6)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    pub fn mark_process_stopped(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE system_processes SET status = 'stopped', updated_at = ?1 WHERE name = ?2",
                params![now_ts(), name],
            )?;
            Ok(())
        })
    }

    /// Best-effort kill: SIGTERM, a short grace wait, then SIGKILL, then
    /// the status update. Returns false when no running row exists or the
    /// signal could not be delivered.
    pub fn kill_process(&self, name: &str) -> Result<bool> {
        let Some(pid) = self.get_process_pid(name)? else {
            return Ok(false);
        };
        if !terminate_pid(pid) {
            // Already gone — reconcile the row anyway.
            self.mark_process_stopped(name)?;
            return Ok(false);
        }
        self.mark_process_stopped(name)?;
        tracing::info!(name, pid, "process killed");
        Ok(true)
    }

    /// Mark rows whose pid no longer exists as `dead`. Returns how many
    /// rows were reconciled.
    pub fn cleanup_dead_processes(&self) -> Result<usize> {
        let running: Vec<(String, i64)> = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name, pid FROM system_processes WHERE status = 'running'")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })?;

        let mut reconciled = 0;
        for (name, pid) in running {
            if !pid_alive(pid) {
                self.with_conn(|conn| {
                    conn.execute(
                        "UPDATE system_processes SET status = 'dead', updated_at = ?1 WHERE name = ?2",
                        params![now_ts(), name],
                    )?;
                    Ok(())
                })?;
                tracing::warn!(name = %name, pid, "stale process row marked dead");
                reconciled += 1;
            }
        }
        Ok(reconciled)
    }

    // ── Log sink ──────────────────────────────────────────────────────

    /// Append a log record. This path must never fail outward: a broken
    /// database would otherwise take the logging pipeline down with it.
    pub fn write_log_record(
        &self,
        level: &str,
        module: &str,
        func: &str,
        message: &str,
        context: Option<&serde_json::Value>,
    ) {
        let context_json = context.and_then(|v| serde_json::to_string(v).ok());
        let outcome = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO logs (ts, level, module, func, message, context_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![now_ts(), level, module, func, message, context_json],
            )?;
            Ok(())
        });
        if outcome.is_err() {
            // Swallowed by contract.
        }
    }

    pub fn count_log_records(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?))
    }
}

/// True when `pid` exists (signal 0 probe).
#[cfg(unix)]
pub fn pid_alive(pid: i64) -> bool {
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    // EPERM means alive but owned by someone else; ESRCH means gone.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: i64) -> bool {
    true
}

/// SIGTERM, wait up to a second, SIGKILL if still alive.
#[cfg(unix)]
fn terminate_pid(pid: i64) -> bool {
    let pid_t = pid as libc::pid_t;
    if unsafe { libc::kill(pid_t, libc::SIGTERM) } != 0 {
        return false;
    }
    for _ in 0..10 {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if !pid_alive(pid) {
            return true;
        }
    }
    unsafe { libc::kill(pid_t, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
fn terminate_pid(_pid: i64) -> bool {
    false
}
