//! System, store and freshness health checks

use super::{Alert, AlertSeverity, AlertSink};
use crate::stores::ItemStore;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use sysinfo::{Disks, System};
use tracing::{info, warn};

/// Health status for one metric or the whole system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One evaluated health metric
#[derive(Debug, Clone)]
pub struct HealthMetric {
    pub name: String,
    pub status: HealthStatus,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl HealthMetric {
    fn new(name: &str, status: HealthStatus, value: f64, threshold: f64, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            value,
            threshold,
            message,
            at: Utc::now(),
        }
    }

    fn unknown(name: &str, reason: String) -> Self {
        Self::new(name, HealthStatus::Unknown, 0.0, 0.0, reason)
    }
}

/// Two-tier thresholds for every monitored metric
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub cpu_warn_pct: f64,
    pub cpu_critical_pct: f64,
    pub ram_warn_pct: f64,
    pub ram_critical_pct: f64,
    pub disk_warn_pct: f64,
    pub disk_critical_pct: f64,
    pub store_warn_ms: f64,
    pub store_critical_ms: f64,
    pub lag_warn_minutes: f64,
    pub lag_critical_minutes: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_warn_pct: 70.0,
            cpu_critical_pct: 90.0,
            ram_warn_pct: 80.0,
            ram_critical_pct: 95.0,
            disk_warn_pct: 85.0,
            disk_critical_pct: 95.0,
            store_warn_ms: 500.0,
            store_critical_ms: 1000.0,
            lag_warn_minutes: 30.0,
            lag_critical_minutes: 60.0,
        }
    }
}

/// Result of one full check
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub at: DateTime<Utc>,
    pub overall: HealthStatus,
    pub metrics: Vec<HealthMetric>,
}

impl HealthReport {
    /// Render for the operator report sink
    pub fn format_text(&self) -> String {
        let icon = match self.overall {
            HealthStatus::Healthy => "✅",
            HealthStatus::Degraded => "⚠️",
            HealthStatus::Critical => "🚨",
            HealthStatus::Unknown => "❓",
        };
        let mut text = format!("{} System status: {}\n\n", icon, self.overall);
        for metric in &self.metrics {
            text.push_str(&format!("[{}] {}\n", metric.status, metric.message));
        }
        text
    }
}

/// Monitors system resources, store latency and monitoring freshness.
///
/// Every check is fallible in isolation; a failed computation becomes an
/// `Unknown` metric instead of an error.
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(HealthThresholds::default())
    }

    /// Register a sink for degraded/critical alerts
    pub fn register_sink(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().expect("sink lock poisoned").push(sink);
    }

    fn two_tier(value: f64, warn: f64, critical: f64) -> HealthStatus {
        if value >= critical {
            HealthStatus::Critical
        } else if value >= warn {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// CPU, RAM and disk usage
    fn check_system(&self) -> Vec<HealthMetric> {
        let mut metrics = Vec::new();
        let mut sys = System::new_all();
        sys.refresh_all();

        let cpu = if sys.cpus().is_empty() {
            None
        } else {
            Some(
                sys.cpus().iter().map(|c| c.cpu_usage() as f64).sum::<f64>()
                    / sys.cpus().len() as f64,
            )
        };
        match cpu {
            Some(cpu) => metrics.push(HealthMetric::new(
                "cpu_usage",
                Self::two_tier(cpu, self.thresholds.cpu_warn_pct, self.thresholds.cpu_critical_pct),
                cpu,
                self.thresholds.cpu_warn_pct,
                format!("CPU: {cpu:.1}%"),
            )),
            None => metrics.push(HealthMetric::unknown(
                "cpu_usage",
                "no CPU data available".to_string(),
            )),
        }

        let total_ram = sys.total_memory();
        if total_ram > 0 {
            let ram_pct = sys.used_memory() as f64 / total_ram as f64 * 100.0;
            metrics.push(HealthMetric::new(
                "ram_usage",
                Self::two_tier(
                    ram_pct,
                    self.thresholds.ram_warn_pct,
                    self.thresholds.ram_critical_pct,
                ),
                ram_pct,
                self.thresholds.ram_warn_pct,
                format!(
                    "RAM: {:.1}% ({:.1}GB / {:.1}GB)",
                    ram_pct,
                    sys.used_memory() as f64 / 1024_f64.powi(3),
                    total_ram as f64 / 1024_f64.powi(3),
                ),
            ));
        } else {
            metrics.push(HealthMetric::unknown(
                "ram_usage",
                "no memory data available".to_string(),
            ));
        }

        let disks = Disks::new_with_refreshed_list();
        let (total, available) = disks
            .iter()
            .fold((0u64, 0u64), |(t, a), d| (t + d.total_space(), a + d.available_space()));
        if total > 0 {
            let disk_pct = (total - available) as f64 / total as f64 * 100.0;
            metrics.push(HealthMetric::new(
                "disk_usage",
                Self::two_tier(
                    disk_pct,
                    self.thresholds.disk_warn_pct,
                    self.thresholds.disk_critical_pct,
                ),
                disk_pct,
                self.thresholds.disk_warn_pct,
                format!("Disk: {disk_pct:.1}%"),
            ));
        } else {
            metrics.push(HealthMetric::unknown(
                "disk_usage",
                "no disk data available".to_string(),
            ));
        }

        metrics
    }

    /// Store round-trip latency
    async fn check_store(&self, store: &dyn ItemStore) -> HealthMetric {
        let started = Instant::now();
        match store.ping().await {
            Ok(()) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                HealthMetric::new(
                    "store",
                    Self::two_tier(
                        elapsed_ms,
                        self.thresholds.store_warn_ms,
                        self.thresholds.store_critical_ms,
                    ),
                    elapsed_ms,
                    self.thresholds.store_warn_ms,
                    format!("Store round-trip: {elapsed_ms:.0}ms"),
                )
            }
            Err(e) => HealthMetric::new(
                "store",
                HealthStatus::Critical,
                0.0,
                0.0,
                format!("Store unreachable: {e}"),
            ),
        }
    }

    /// Lag since the least-recently-updated tracked item was refreshed
    async fn check_monitoring_lag(&self, store: &dyn ItemStore) -> HealthMetric {
        match store.oldest_update().await {
            Ok(Some(oldest)) => {
                let lag_minutes = (Utc::now() - oldest).num_seconds() as f64 / 60.0;
                HealthMetric::new(
                    "monitoring_lag",
                    Self::two_tier(
                        lag_minutes,
                        self.thresholds.lag_warn_minutes,
                        self.thresholds.lag_critical_minutes,
                    ),
                    lag_minutes,
                    self.thresholds.lag_warn_minutes,
                    format!("Monitoring lag: {lag_minutes:.0} minutes"),
                )
            }
            Ok(None) => HealthMetric::new(
                "monitoring_lag",
                HealthStatus::Healthy,
                0.0,
                self.thresholds.lag_warn_minutes,
                "No tracked items".to_string(),
            ),
            Err(e) => HealthMetric::unknown("monitoring_lag", format!("Lag check failed: {e}")),
        }
    }

    /// Run every check, derive the overall status and dispatch an alert when
    /// not healthy
    pub async fn full_check(&self, store: &dyn ItemStore) -> HealthReport {
        let mut metrics = self.check_system();
        metrics.push(self.check_store(store).await);
        metrics.push(self.check_monitoring_lag(store).await);

        let overall = Self::overall(&metrics);
        let report = HealthReport {
            at: Utc::now(),
            overall,
            metrics,
        };

        match overall {
            HealthStatus::Healthy => info!("Health check: healthy"),
            status => {
                warn!("Health check: {}", status);
                self.dispatch(&report).await;
            }
        }

        report
    }

    fn overall(metrics: &[HealthMetric]) -> HealthStatus {
        if metrics.iter().any(|m| m.status == HealthStatus::Critical) {
            HealthStatus::Critical
        } else if metrics.iter().any(|m| m.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    async fn dispatch(&self, report: &HealthReport) {
        let severity = if report.overall == HealthStatus::Critical {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };
        let alert = Alert::new(
            severity,
            "health_monitor",
            "System health degraded",
            &report.format_text(),
        );

        let sinks = self.sinks.read().expect("sink lock poisoned").clone();
        for sink in sinks {
            if let Err(e) = sink.send(&alert).await {
                warn!("Health alert sink failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TrackedItem;
    use crate::stores::MemoryStore;
    use chrono::Duration;

    fn metric(status: HealthStatus) -> HealthMetric {
        HealthMetric::new("m", status, 0.0, 0.0, String::new())
    }

    #[test]
    fn test_two_tier_boundaries() {
        assert_eq!(HealthMonitor::two_tier(69.9, 70.0, 90.0), HealthStatus::Healthy);
        assert_eq!(HealthMonitor::two_tier(70.0, 70.0, 90.0), HealthStatus::Degraded);
        assert_eq!(HealthMonitor::two_tier(90.0, 70.0, 90.0), HealthStatus::Critical);
    }

    #[test]
    fn test_overall_worst_wins() {
        assert_eq!(
            HealthMonitor::overall(&[metric(HealthStatus::Healthy), metric(HealthStatus::Healthy)]),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthMonitor::overall(&[metric(HealthStatus::Healthy), metric(HealthStatus::Degraded)]),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthMonitor::overall(&[
                metric(HealthStatus::Degraded),
                metric(HealthStatus::Critical)
            ]),
            HealthStatus::Critical
        );
    }

    #[tokio::test]
    async fn test_monitoring_lag_from_oldest_item() {
        let store = MemoryStore::new(-1257786);
        store
            .insert_item(TrackedItem {
                id: 1,
                owner_id: 1,
                external_id: 100,
                name: "stale".to_string(),
                variant: None,
                last_basic_price: None,
                last_sale_price: None,
                last_qty: None,
                out_of_stock: false,
                rule: crate::domain::NotifyRule::Any,
                updated_at: Utc::now() - Duration::minutes(90),
            })
            .await;

        let monitor = HealthMonitor::with_defaults();
        let metric = monitor.check_monitoring_lag(&store).await;
        assert_eq!(metric.status, HealthStatus::Critical);

        let empty = MemoryStore::new(-1257786);
        let metric = monitor.check_monitoring_lag(&empty).await;
        assert_eq!(metric.status, HealthStatus::Healthy);
    }
}
