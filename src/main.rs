use clap::{Parser, Subcommand};
use pricewatch::config::LoggingConfig;
use pricewatch::error::Result;
use pricewatch::fetch::SnapshotSource;
use pricewatch::notify::{LogSink, NotificationSink, ReportSink};
use pricewatch::stores::{HistoryStore, ItemStore};
use pricewatch::telemetry::ErrorTrackerConfig;
use pricewatch::{
    AppConfig, ChromeSessionBuilder, ErrorTracker, HealthMonitor, MarketplaceClient,
    MonitorScheduler, PostgresStore, PriceFetcher, SessionManager, WatchError, WebhookNotifier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pricewatch", about = "Marketplace price and stock monitor")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the continuous monitoring loop
    Run {
        /// Use the plain endpoint, skipping anti-bot session management
        #[arg(long)]
        plain: bool,
    },
    /// Fetch one item once and print its snapshot
    Check {
        /// Marketplace article number
        item_id: i64,
        /// Destination (region) code override
        #[arg(long)]
        region: Option<i32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check { item_id, region }) => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config_dir)?;
            run_check(config, item_id, region).await?;
        }
        Some(Commands::Run { plain }) => {
            let config = AppConfig::load_from(&cli.config_dir)?;
            init_logging(&config.logging);
            run_monitor(config, plain).await?;
        }
        None => {
            let config = AppConfig::load_from(&cli.config_dir)?;
            init_logging(&config.logging);
            run_monitor(config, false).await?;
        }
    }

    Ok(())
}

async fn run_check(config: AppConfig, item_id: i64, region: Option<i32>) -> Result<()> {
    let client = MarketplaceClient::new(config.marketplace.clone())?;
    let region = region.unwrap_or(config.marketplace.default_region);

    let snapshot = client.fetch_detail(item_id, region).await?;
    println!("{}", snapshot.name);
    for variant in &snapshot.variants {
        let label = if variant.name.is_empty() || variant.name == "0" {
            "-".to_string()
        } else {
            variant.name.clone()
        };
        println!(
            "  size {:>4}  basic {:>8}  sale {:>8}  qty {:>5}",
            label, variant.price.basic, variant.price.sale, variant.qty
        );
    }
    Ok(())
}

async fn run_monitor(config: AppConfig, plain: bool) -> Result<()> {
    if let Err(errors) = config.validate() {
        return Err(WatchError::Internal(format!(
            "invalid configuration: {}",
            errors.join("; ")
        )));
    }

    info!("Starting pricewatch");

    let store = Arc::new(
        PostgresStore::new(
            &config.database.url,
            config.database.max_connections,
            config.marketplace.default_region,
        )
        .await?,
    );
    store.migrate().await?;

    let tracker = Arc::new(ErrorTracker::new(ErrorTrackerConfig::from(&config.telemetry)));
    let health = Arc::new(HealthMonitor::with_defaults());

    let reports: Arc<dyn ReportSink> = match &config.notify.report_webhook_url {
        Some(url) => {
            let reporter = WebhookNotifier::new(url.clone());
            tracker.register_sink(reporter.clone());
            health.register_sink(reporter.clone());
            reporter
        }
        None => {
            info!("No report webhook configured, reports go to the log");
            Arc::new(LogSink)
        }
    };
    let notifier: Arc<dyn NotificationSink> = match &config.notify.webhook_url {
        Some(url) => WebhookNotifier::new(url.clone()),
        None => {
            info!("No notification webhook configured, notifications go to the log");
            Arc::new(LogSink)
        }
    };

    let hardened = config.fetch.hardened && !plain;
    let session = if hardened {
        let builder = Arc::new(ChromeSessionBuilder::new(
            config.session.clone(),
            &config.marketplace,
        ));
        info!("Hardened endpoint enabled, anti-bot session manager active");
        Some(Arc::new(SessionManager::new(builder, &config.session)))
    } else {
        info!("Plain endpoint mode, no session management");
        None
    };

    let client = MarketplaceClient::new(config.marketplace.clone())?;
    let fetcher = Arc::new(PriceFetcher::new(
        client,
        session.clone(),
        Arc::clone(&tracker),
        &config.fetch,
    ));

    if hardened && config.session.warmup.enabled {
        fetcher.warm_up().await;
    }

    let scheduler = Arc::new(MonitorScheduler::new(
        Arc::clone(&store) as Arc<dyn ItemStore>,
        Arc::clone(&store) as Arc<dyn HistoryStore>,
        Arc::clone(&fetcher) as Arc<dyn SnapshotSource>,
        notifier,
        reports,
        Arc::clone(&tracker),
        config.monitor.clone(),
        &config.marketplace,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor_task = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown_rx.clone();
        async move { scheduler.run(shutdown).await }
    });

    let health_task = tokio::spawn(health_loop(
        Arc::clone(&health),
        Arc::clone(&store),
        Duration::from_secs(config.telemetry.health_check_interval_secs),
        shutdown_rx.clone(),
    ));

    info!("All tasks started, monitoring is live");
    shutdown_signal().await;
    info!("Shutdown signal received, stopping");

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_task.await {
        error!("Monitor task join failed: {}", e);
    }
    if let Err(e) = health_task.await {
        error!("Health task join failed: {}", e);
    }
    if let Some(manager) = session {
        manager.shutdown().await;
    }

    info!("Stopped");
    Ok(())
}

async fn health_loop(
    monitor: Arc<HealthMonitor>,
    store: Arc<PostgresStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                monitor.full_check(store.as_ref()).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn init_logging(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},pricewatch=debug,sqlx=warn", cfg.level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_logging_simple() {
    // Minimal logging for CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
