use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub fetch: FetchConfig,
    pub session: SessionConfig,
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between full passes over the tracked set
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Items processed concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between batches within a cycle
    #[serde(default = "default_batch_pause")]
    pub batch_pause_secs: u64,
}

fn default_poll_interval() -> u64 {
    600
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_pause() -> u64 {
    5
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            batch_pause_secs: default_batch_pause(),
        }
    }
}

impl MonitorConfig {
    /// Cycles per hourly report
    pub fn report_every_cycles(&self) -> u64 {
        (3600 / self.poll_interval_secs.max(1)).max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Process-wide cap on concurrent outbound fetches
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Jitter slept before each fetch, milliseconds
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
    /// Hard per-fetch timeout
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Use the hardened endpoint via the session manager
    #[serde(default = "default_true")]
    pub hardened: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_concurrency() -> usize {
    10
}

fn default_jitter_min_ms() -> u64 {
    200
}

fn default_jitter_max_ms() -> u64 {
    1000
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
            timeout_secs: default_fetch_timeout(),
            hardened: true,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_backoff")]
    pub backoff_factor: f64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    2000
}

fn default_retry_backoff() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_ms(),
            backoff_factor: default_retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Context lifetime before a rebuild
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    /// Requests served by one context before a rebuild
    #[serde(default = "default_session_requests")]
    pub max_requests: u32,
    /// Page navigation budget during a build
    #[serde(default = "default_nav_timeout")]
    pub nav_timeout_secs: u64,
    /// How long to wait for a qualifying API request to intercept
    #[serde(default = "default_intercept_timeout")]
    pub intercept_timeout_secs: u64,
    /// Header carrying the anti-bot challenge token
    #[serde(default = "default_challenge_header")]
    pub challenge_header: String,
    /// Article navigated to when building a context
    pub probe_item_id: i64,
    #[serde(default)]
    pub warmup: WarmupConfig,
}

fn default_session_ttl() -> u64 {
    120
}

fn default_session_requests() -> u32 {
    20
}

fn default_nav_timeout() -> u64 {
    20
}

fn default_intercept_timeout() -> u64 {
    10
}

fn default_challenge_header() -> String {
    "x-pow".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarmupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Low-stakes articles used for sacrificial requests
    #[serde(default)]
    pub item_ids: Vec<i64>,
    /// Requests issued during warm-up
    #[serde(default = "default_warmup_probes")]
    pub probe_requests: u32,
    /// Successes out of probe_requests considered a pass (advisory)
    #[serde(default = "default_warmup_successes")]
    pub required_successes: u32,
}

fn default_warmup_probes() -> u32 {
    3
}

fn default_warmup_successes() -> u32 {
    2
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            item_ids: Vec::new(),
            probe_requests: default_warmup_probes(),
            required_successes: default_warmup_successes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceConfig {
    /// Detail API base, e.g. "https://u-card.wb.ru/cards/v4/detail"
    pub detail_url: String,
    /// Product page template with `{id}` placeholder
    pub page_url_template: String,
    /// Substring a browser request must contain to qualify for interception
    pub api_url_marker: String,
    /// Destination (region) code used when the owner has none
    #[serde(default = "default_region")]
    pub default_region: i32,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_region() -> i32 {
    -1257786
}

fn default_currency() -> String {
    "rub".to_string()
}

impl MarketplaceConfig {
    /// Page URL for one article
    pub fn page_url(&self, external_id: i64) -> String {
        self.page_url_template.replace("{id}", &external_id.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Sliding window for error statistics, minutes
    #[serde(default = "default_error_window")]
    pub error_window_minutes: i64,
    #[serde(default = "default_warn_pct")]
    pub warn_threshold_pct: f64,
    #[serde(default = "default_critical_pct")]
    pub critical_threshold_pct: f64,
    /// Requests required before alerting is considered
    #[serde(default = "default_min_requests")]
    pub min_requests_for_alert: usize,
    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown_minutes: i64,
    /// Seconds between full health checks
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
}

fn default_error_window() -> i64 {
    60
}

fn default_warn_pct() -> f64 {
    5.0
}

fn default_critical_pct() -> f64 {
    10.0
}

fn default_min_requests() -> usize {
    50
}

fn default_alert_cooldown() -> i64 {
    15
}

fn default_health_interval() -> u64 {
    300
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            error_window_minutes: default_error_window(),
            warn_threshold_pct: default_warn_pct(),
            critical_threshold_pct: default_critical_pct(),
            min_requests_for_alert: default_min_requests(),
            alert_cooldown_minutes: default_alert_cooldown(),
            health_check_interval_secs: default_health_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifyConfig {
    /// Webhook receiving per-owner notifications
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Webhook receiving hourly reports and telemetry alerts
    #[serde(default)]
    pub report_webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PRICEWATCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PRICEWATCH_FETCH__CONCURRENCY, etc.)
            .add_source(
                Environment::with_prefix("PRICEWATCH")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.monitor.poll_interval_secs == 0 {
            errors.push("monitor.poll_interval_secs must be positive".to_string());
        }
        if self.monitor.batch_size == 0 {
            errors.push("monitor.batch_size must be positive".to_string());
        }
        if self.fetch.concurrency == 0 {
            errors.push("fetch.concurrency must be positive".to_string());
        }
        if self.fetch.jitter_min_ms > self.fetch.jitter_max_ms {
            errors.push("fetch.jitter_min_ms must not exceed fetch.jitter_max_ms".to_string());
        }
        if self.fetch.retry.max_attempts == 0 {
            errors.push("fetch.retry.max_attempts must be positive".to_string());
        }
        if self.session.warmup.required_successes > self.session.warmup.probe_requests {
            errors.push(
                "session.warmup.required_successes cannot exceed probe_requests".to_string(),
            );
        }
        if url::Url::parse(&self.marketplace.detail_url).is_err() {
            errors.push(format!(
                "marketplace.detail_url is not a valid URL: {}",
                self.marketplace.detail_url
            ));
        }
        if !self.marketplace.page_url_template.contains("{id}") {
            errors.push("marketplace.page_url_template must contain {id}".to_string());
        }
        for webhook in [&self.notify.webhook_url, &self.notify.report_webhook_url]
            .into_iter()
            .flatten()
        {
            if url::Url::parse(webhook).is_err() {
                errors.push(format!("notify webhook is not a valid URL: {webhook}"));
            }
        }
        if self.telemetry.warn_threshold_pct >= self.telemetry.critical_threshold_pct {
            errors.push(
                "telemetry.warn_threshold_pct must be below critical_threshold_pct".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Built-in defaults for tooling and tests (no config files present)
    pub fn default_config() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            fetch: FetchConfig::default(),
            session: SessionConfig {
                ttl_secs: default_session_ttl(),
                max_requests: default_session_requests(),
                nav_timeout_secs: default_nav_timeout(),
                intercept_timeout_secs: default_intercept_timeout(),
                challenge_header: default_challenge_header(),
                probe_item_id: 148059062,
                warmup: WarmupConfig::default(),
            },
            marketplace: MarketplaceConfig {
                detail_url: "https://u-card.wb.ru/cards/v4/detail".to_string(),
                page_url_template: "https://www.wildberries.ru/catalog/{id}/detail.aspx"
                    .to_string(),
                api_url_marker: "card.wb.ru/cards".to_string(),
                default_region: default_region(),
                currency: default_currency(),
            },
            telemetry: TelemetryConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/pricewatch".to_string(),
                max_connections: default_max_connections(),
            },
            notify: NotifyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = AppConfig::default_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.monitor.report_every_cycles(), 6);
        assert_eq!(cfg.fetch.concurrency, 10);
        assert_eq!(cfg.session.ttl_secs, 120);
        assert_eq!(cfg.session.max_requests, 20);
    }

    #[test]
    fn test_validate_catches_bad_values() {
        let mut cfg = AppConfig::default_config();
        cfg.fetch.jitter_min_ms = 5000;
        cfg.marketplace.page_url_template = "https://example.com/catalog".to_string();
        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
