//! Sliding-window tracker for upstream API errors
//!
//! Keeps successes and categorized errors in bounded, time-windowed buffers
//! and raises rate-limited alerts when the error rate crosses its
//! thresholds.

use super::{Alert, AlertSeverity, AlertSink};
use crate::config::TelemetryConfig;
use crate::error::WatchError;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Ring buffer capacity; events beyond this are dropped oldest-first even
/// inside the time window
const BUFFER_CAPACITY: usize = 10_000;

/// Categories of upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Forbidden,
    RateLimited,
    ServerError,
    Timeout,
    Transport,
    Parse,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Forbidden => "403_forbidden",
            ErrorCategory::RateLimited => "429_rate_limit",
            ErrorCategory::ServerError => "5xx_server_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Transport => "transport_error",
            ErrorCategory::Parse => "parse_error",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Categorize a pipeline error for tracking
    pub fn from_error(err: &WatchError) -> Self {
        match err {
            WatchError::UpstreamStatus { status: 403, .. } | WatchError::ChallengeRejected(_) => {
                ErrorCategory::Forbidden
            }
            WatchError::UpstreamStatus { status: 429, .. } => ErrorCategory::RateLimited,
            WatchError::UpstreamStatus { status, .. } if *status >= 500 => {
                ErrorCategory::ServerError
            }
            WatchError::FetchTimeout(_) => ErrorCategory::Timeout,
            WatchError::Http(_) | WatchError::FetchTransport(_) => ErrorCategory::Transport,
            WatchError::Parse { .. } | WatchError::Json(_) => ErrorCategory::Parse,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One tracked error occurrence
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub at: DateTime<Utc>,
    pub category: ErrorCategory,
    pub item: Option<i64>,
    pub detail: Option<String>,
}

/// Tracker thresholds and windows
#[derive(Debug, Clone)]
pub struct ErrorTrackerConfig {
    pub window: Duration,
    pub warn_threshold_pct: f64,
    pub critical_threshold_pct: f64,
    pub min_requests_for_alert: usize,
    pub alert_cooldown: Duration,
}

impl Default for ErrorTrackerConfig {
    fn default() -> Self {
        Self {
            window: Duration::minutes(60),
            warn_threshold_pct: 5.0,
            critical_threshold_pct: 10.0,
            min_requests_for_alert: 50,
            alert_cooldown: Duration::minutes(15),
        }
    }
}

impl From<&TelemetryConfig> for ErrorTrackerConfig {
    fn from(cfg: &TelemetryConfig) -> Self {
        Self {
            window: Duration::minutes(cfg.error_window_minutes),
            warn_threshold_pct: cfg.warn_threshold_pct,
            critical_threshold_pct: cfg.critical_threshold_pct,
            min_requests_for_alert: cfg.min_requests_for_alert,
            alert_cooldown: Duration::minutes(cfg.alert_cooldown_minutes),
        }
    }
}

/// Current window statistics
#[derive(Debug, Clone)]
pub struct ErrorStatistics {
    pub window_minutes: i64,
    pub total_requests: usize,
    pub total_errors: usize,
    pub total_successes: usize,
    pub error_rate_percent: f64,
    pub breakdown: HashMap<ErrorCategory, usize>,
    pub is_healthy: bool,
    pub is_critical: bool,
}

struct Inner {
    errors: VecDeque<ErrorEvent>,
    successes: VecDeque<DateTime<Utc>>,
    counts: HashMap<ErrorCategory, usize>,
    last_alert: Option<DateTime<Utc>>,
}

/// Error tracker with automatic, cooldown-limited alerts
pub struct ErrorTracker {
    config: ErrorTrackerConfig,
    inner: Mutex<Inner>,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
}

impl ErrorTracker {
    pub fn new(config: ErrorTrackerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                errors: VecDeque::new(),
                successes: VecDeque::new(),
                counts: HashMap::new(),
                last_alert: None,
            }),
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ErrorTrackerConfig::default())
    }

    /// Register a sink for threshold alerts
    pub fn register_sink(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().expect("sink lock poisoned").push(sink);
    }

    /// Record a successful request
    pub fn track_success(&self) {
        let mut inner = self.inner.lock().expect("tracker lock poisoned");
        if inner.successes.len() == BUFFER_CAPACITY {
            inner.successes.pop_front();
        }
        inner.successes.push_back(Utc::now());
    }

    /// Record a failed request
    pub fn track_error(&self, category: ErrorCategory, item: Option<i64>, detail: Option<String>) {
        warn!(
            "API error tracked: {} (item={:?}, detail={:?})",
            category, item, detail
        );

        let mut inner = self.inner.lock().expect("tracker lock poisoned");
        if inner.errors.len() == BUFFER_CAPACITY {
            if let Some(old) = inner.errors.pop_front() {
                if let Some(count) = inner.counts.get_mut(&old.category) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        inner.errors.push_back(ErrorEvent {
            at: Utc::now(),
            category,
            item,
            detail,
        });
        *inner.counts.entry(category).or_insert(0) += 1;
    }

    fn prune(inner: &mut Inner, window: Duration) {
        let cutoff = Utc::now() - window;

        while inner.errors.front().is_some_and(|e| e.at < cutoff) {
            if let Some(old) = inner.errors.pop_front() {
                if let Some(count) = inner.counts.get_mut(&old.category) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        while inner.successes.front().is_some_and(|t| *t < cutoff) {
            inner.successes.pop_front();
        }
    }

    /// Statistics over the current window
    pub fn statistics(&self) -> ErrorStatistics {
        let mut inner = self.inner.lock().expect("tracker lock poisoned");
        Self::prune(&mut inner, self.config.window);

        let total_errors = inner.errors.len();
        let total_successes = inner.successes.len();
        let total_requests = total_errors + total_successes;

        let error_rate = if total_requests > 0 {
            total_errors as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };
        let error_rate = (error_rate * 100.0).round() / 100.0;

        ErrorStatistics {
            window_minutes: self.config.window.num_minutes(),
            total_requests,
            total_errors,
            total_successes,
            error_rate_percent: error_rate,
            breakdown: inner
                .counts
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(category, count)| (*category, *count))
                .collect(),
            is_healthy: error_rate < self.config.warn_threshold_pct,
            is_critical: error_rate >= self.config.critical_threshold_pct,
        }
    }

    /// Evaluate the window and dispatch at most one alert per cooldown.
    ///
    /// Returns the alert that was dispatched, if any.
    pub async fn check_and_alert(&self) -> Option<Alert> {
        let stats = self.statistics();

        if stats.total_requests < self.config.min_requests_for_alert {
            return None;
        }

        let severity = if stats.is_critical {
            AlertSeverity::Critical
        } else if !stats.is_healthy {
            AlertSeverity::Warning
        } else {
            return None;
        };

        {
            let mut inner = self.inner.lock().expect("tracker lock poisoned");
            let now = Utc::now();
            if let Some(last) = inner.last_alert {
                if now - last < self.config.alert_cooldown {
                    debug!("Error alert suppressed by cooldown");
                    return None;
                }
            }
            inner.last_alert = Some(now);
        }

        let alert = Alert::new(
            severity,
            "error_tracker",
            "Upstream API error rate",
            &Self::format_alert(&stats),
        );

        let sinks = self.sinks.read().expect("sink lock poisoned").clone();
        for sink in sinks {
            if let Err(e) = sink.send(&alert).await {
                warn!("Alert sink failed: {}", e);
            }
        }

        Some(alert)
    }

    fn format_alert(stats: &ErrorStatistics) -> String {
        let mut message = format!(
            "Statistics over {} minutes:\n\
             - requests: {}\n\
             - errors: {}\n\
             - error rate: {}%\n",
            stats.window_minutes, stats.total_requests, stats.total_errors,
            stats.error_rate_percent
        );

        if !stats.breakdown.is_empty() {
            message.push_str("\nError types:\n");
            let mut breakdown: Vec<_> = stats.breakdown.iter().collect();
            breakdown.sort_by(|a, b| b.1.cmp(a.1));
            for (category, count) in breakdown {
                message.push_str(&format!("- {category}: {count}\n"));
            }
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn send(&self, _alert: &Alert) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tracker_with_short_min(min_requests: usize) -> ErrorTracker {
        ErrorTracker::new(ErrorTrackerConfig {
            min_requests_for_alert: min_requests,
            ..Default::default()
        })
    }

    #[test]
    fn test_error_rate_math() {
        let tracker = ErrorTracker::with_defaults();
        for _ in 0..45 {
            tracker.track_success();
        }
        for _ in 0..5 {
            tracker.track_error(ErrorCategory::Timeout, Some(1), None);
        }

        let stats = tracker.statistics();
        assert_eq!(stats.total_requests, 50);
        assert_eq!(stats.total_errors, 5);
        assert_eq!(stats.error_rate_percent, 10.0);
        assert!(!stats.is_healthy);
        assert!(stats.is_critical);
        assert_eq!(stats.breakdown[&ErrorCategory::Timeout], 5);
    }

    #[test]
    fn test_healthy_below_warn_threshold() {
        let tracker = ErrorTracker::with_defaults();
        for _ in 0..99 {
            tracker.track_success();
        }
        tracker.track_error(ErrorCategory::Transport, None, None);

        let stats = tracker.statistics();
        assert_eq!(stats.error_rate_percent, 1.0);
        assert!(stats.is_healthy);
        assert!(!stats.is_critical);
    }

    #[tokio::test]
    async fn test_no_alert_below_min_requests() {
        let tracker = tracker_with_short_min(50);
        for _ in 0..10 {
            tracker.track_error(ErrorCategory::Forbidden, None, None);
        }
        assert!(tracker.check_and_alert().await.is_none());
    }

    #[tokio::test]
    async fn test_cooldown_limits_to_one_alert() {
        let tracker = tracker_with_short_min(10);
        let sink = Arc::new(CountingSink {
            sent: AtomicUsize::new(0),
        });
        tracker.register_sink(sink.clone());

        for _ in 0..20 {
            tracker.track_error(ErrorCategory::RateLimited, None, None);
        }

        let first = tracker.check_and_alert().await;
        assert!(first.is_some());
        assert_eq!(first.unwrap().severity, AlertSeverity::Critical);

        let second = tracker.check_and_alert().await;
        assert!(second.is_none());
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_categorize() {
        assert_eq!(
            ErrorCategory::from_error(&WatchError::UpstreamStatus {
                status: 403,
                item: 1
            }),
            ErrorCategory::Forbidden
        );
        assert_eq!(
            ErrorCategory::from_error(&WatchError::UpstreamStatus {
                status: 502,
                item: 1
            }),
            ErrorCategory::ServerError
        );
        assert_eq!(
            ErrorCategory::from_error(&WatchError::FetchTimeout(15)),
            ErrorCategory::Timeout
        );
        assert_eq!(
            ErrorCategory::from_error(&WatchError::Parse {
                item: 1,
                reason: "no price".to_string()
            }),
            ErrorCategory::Parse
        );
    }
}
