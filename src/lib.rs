pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod monitor;
pub mod notify;
pub mod session;
pub mod stores;
pub mod telemetry;

pub use config::AppConfig;
pub use domain::{
    NotifyRule, OwnerPrefs, PlanTier, PriceSample, ProductSnapshot, TrackedItem, VariantBlock,
};
pub use error::{Result, WatchError};
pub use fetch::{MarketplaceClient, PriceFetcher, RetryPolicy, SnapshotSource};
pub use monitor::{CycleMetrics, CycleState, MonitorScheduler};
pub use notify::{LogSink, NotificationSink, ReportSink, WebhookNotifier};
pub use session::{ChromeSessionBuilder, SessionBuilder, SessionContext, SessionManager};
pub use stores::{HistoryStore, ItemStore, MemoryStore, PostgresStore};
pub use telemetry::{
    Alert, AlertSeverity, AlertSink, ErrorCategory, ErrorTracker, ErrorTrackerConfig,
    HealthMonitor, HealthStatus,
};
