//! Error-rate and health telemetry

pub mod error_tracker;
pub mod health;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error_tracker::{ErrorCategory, ErrorStatistics, ErrorTracker, ErrorTrackerConfig};
pub use health::{HealthMetric, HealthMonitor, HealthReport, HealthStatus, HealthThresholds};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert payload dispatched to registered sinks
#[derive(Debug, Clone)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub component: String,
    pub title: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Alert {
    pub fn new(severity: AlertSeverity, component: &str, title: &str, message: &str) -> Self {
        Self {
            severity,
            component: component.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        }
    }

    /// Render for a plain-text sink
    pub fn format_text(&self) -> String {
        let icon = match self.severity {
            AlertSeverity::Warning => "⚠️",
            AlertSeverity::Critical => "🚨",
        };
        format!(
            "{} {}: {}\nComponent: {}\nTime: {}\n\n{}",
            icon,
            self.severity,
            self.title,
            self.component,
            self.at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message
        )
    }
}

/// Receiver of telemetry alerts.
///
/// Sink failures are logged by the dispatcher and never propagate.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}
