//! System metrics sampling (CPU, memory, disk, database size) with
//! threshold alerts feeding the `system_health` time series and the stats
//! endpoint.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use sysinfo::{Disks, System};

use vh_domain::config::MonitoringConfig;
use vh_store::{HealthSample, Store};

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: String,
    pub component: String,
    pub message: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub database_size_mb: f64,
    pub active_tasks: i64,
    pub overall_status: String,
    pub alerts: Vec<Alert>,
}

pub struct SystemMonitor {
    config: MonitoringConfig,
    store: Arc<Store>,
    system: Mutex<System>,
}

impl SystemMonitor {
    pub fn new(config: MonitoringConfig, store: Arc<Store>) -> Self {
        Self {
            config,
            store,
            system: Mutex::new(System::new()),
        }
    }

    /// Take one sample. CPU usage needs two refreshes separated by a short
    /// interval to produce a meaningful delta.
    pub async fn sample(&self) -> SystemMetrics {
        {
            self.system.lock().refresh_cpu_usage();
        }
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        let (cpu_percent, memory_percent) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu = f64::from(system.global_cpu_info().cpu_usage());
            let memory = if system.total_memory() > 0 {
                system.used_memory() as f64 / system.total_memory() as f64 * 100.0
            } else {
                0.0
            };
            (cpu, memory)
        };

        let disk_percent = largest_disk_usage_percent();
        let database_size_mb = self.store.database_size_mb();
        let active_tasks = self
            .store
            .get_tasks(&[vh_domain::task::TaskStatus::Running], 100, 0)
            .map(|tasks| tasks.len() as i64)
            .unwrap_or(0);

        let alerts = self.alerts_for(cpu_percent, memory_percent, disk_percent);
        let overall_status = if cpu_percent > 90.0 || memory_percent > 90.0 {
            "critical"
        } else if cpu_percent > 70.0 || memory_percent > 70.0 {
            "warning"
        } else {
            "healthy"
        };

        SystemMetrics {
            cpu_percent,
            memory_percent,
            disk_percent,
            database_size_mb,
            active_tasks,
            overall_status: overall_status.to_string(),
            alerts,
        }
    }

    /// Sample and append to the `system_health` table. Alerts are logged
    /// at WARN so the database sink picks them up too.
    pub async fn sample_and_record(&self, host_status: serde_json::Value) -> SystemMetrics {
        let metrics = self.sample().await;
        for alert in &metrics.alerts {
            tracing::warn!(
                component = %alert.component,
                threshold = alert.threshold,
                "{}",
                alert.message
            );
        }
        let sample = HealthSample {
            ts: chrono::Utc::now().timestamp() as f64,
            cpu_percent: metrics.cpu_percent,
            memory_percent: metrics.memory_percent,
            disk_percent: metrics.disk_percent,
            database_size_mb: metrics.database_size_mb,
            active_tasks: metrics.active_tasks,
            host_status,
        };
        if let Err(e) = self.store.save_system_health(&sample) {
            tracing::error!(error = %e, "failed to record health sample");
        }
        metrics
    }

    fn alerts_for(&self, cpu: f64, memory: f64, disk: f64) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if cpu > self.config.cpu_threshold {
            alerts.push(Alert {
                level: "warning".into(),
                component: "cpu".into(),
                message: format!("High CPU usage: {cpu:.1}%"),
                threshold: self.config.cpu_threshold,
            });
        }
        if memory > self.config.memory_threshold {
            alerts.push(Alert {
                level: "warning".into(),
                component: "memory".into(),
                message: format!("High memory usage: {memory:.1}%"),
                threshold: self.config.memory_threshold,
            });
        }
        if disk > self.config.disk_threshold {
            alerts.push(Alert {
                level: "critical".into(),
                component: "disk".into(),
                message: format!("High disk usage: {disk:.1}%"),
                threshold: self.config.disk_threshold,
            });
        }
        alerts
    }
}

/// Usage percentage of the largest mounted disk (the one the database
/// most plausibly lives on).
fn largest_disk_usage_percent() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .max_by_key(|d| d.total_space())
        .filter(|d| d.total_space() > 0)
        .map(|d| {
            let used = d.total_space() - d.available_space();
            used as f64 / d.total_space() as f64 * 100.0
        })
        .unwrap_or(0.0)
}

/// Host stub status block for health samples and the stats endpoint.
pub fn host_status(config: &vh_domain::config::HostsConfig) -> serde_json::Value {
    let entry = |enabled: bool, kind: &str, description: &str| {
        json!({
            "status": if enabled { "enabled" } else { "disabled" },
            "type": kind,
            "description": description,
        })
    };
    json!({
        "host1": {"status": "active", "type": "sqlite", "description": "Primary storage"},
        "host2": entry(config.host2.enabled, "analytics", "Analytics sync"),
        "host3": entry(config.host3.enabled, "llm", "AI analysis"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vh_domain::config::HostsConfig;

    fn monitor_with_thresholds(
        cpu: f64,
        memory: f64,
        disk: f64,
    ) -> (SystemMonitor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            Store::open_at(&dir.path().join("m.sqlite3"), 5, true).unwrap(),
        );
        let monitor = SystemMonitor::new(
            MonitoringConfig {
                cpu_threshold: cpu,
                memory_threshold: memory,
                disk_threshold: disk,
                interval_sec: 300,
            },
            store,
        );
        (monitor, dir)
    }

    #[test]
    fn alerts_fire_only_above_thresholds() {
        let (monitor, _dir) = monitor_with_thresholds(80.0, 85.0, 90.0);
        assert!(monitor.alerts_for(50.0, 50.0, 50.0).is_empty());

        let alerts = monitor.alerts_for(95.0, 99.0, 99.0);
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].component, "cpu");
        assert_eq!(alerts[2].level, "critical");
    }

    #[tokio::test]
    async fn sample_and_record_appends_a_health_row() {
        let (monitor, _dir) = monitor_with_thresholds(200.0, 200.0, 200.0);
        let metrics = monitor
            .sample_and_record(host_status(&HostsConfig::default()))
            .await;
        assert!(metrics.alerts.is_empty());

        let rows = monitor.store.get_recent_health(1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].host_status["host1"]["status"], "active");
    }

    #[test]
    fn host_status_reflects_enabled_flags() {
        let mut hosts = HostsConfig::default();
        hosts.host2.enabled = true;
        let status = host_status(&hosts);
        assert_eq!(status["host2"]["status"], "enabled");
        assert_eq!(status["host3"]["status"], "disabled");
    }
}
