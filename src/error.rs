use thiserror::Error;

/// Main error type for the monitoring service
#[derive(Error, Debug)]
pub enum WatchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch timed out after {0}s")]
    FetchTimeout(u64),

    #[error("Fetch transport error: {0}")]
    FetchTransport(String),

    #[error("Upstream returned HTTP {status} for item {item}")]
    UpstreamStatus { status: u16, item: i64 },

    // Anti-bot session errors
    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Challenge rejected by upstream: {0}")]
    ChallengeRejected(String),

    #[error("Browser automation error: {0}")]
    Browser(String),

    // Payload errors
    #[error("Parse error for item {item}: {reason}")]
    Parse { item: i64, reason: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Item processing
    #[error("No variant selected for item {0}")]
    VariantNotConfigured(i64),

    #[error("Notification delivery failed for owner {owner}: {reason}")]
    NotificationDelivery { owner: i64, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WatchError
pub type Result<T> = std::result::Result<T, WatchError>;

impl WatchError {
    /// True for upstream rejections that should force a session rebuild
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            WatchError::ChallengeRejected(_)
                | WatchError::UpstreamStatus {
                    status: 401 | 403 | 429,
                    ..
                }
        )
    }
}
