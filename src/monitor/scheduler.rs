//! Batch monitor scheduler
//!
//! Drives the continuous polling loop: load the tracked set, process it in
//! bounded concurrent batches, apply the notify policy, persist new
//! baselines and roll metrics into the hourly report.

use super::metrics::{CycleMetrics, HourlyAccumulator};
use super::policy::{self, Observation};
use crate::config::{MarketplaceConfig, MonitorConfig};
use crate::domain::{OwnerPrefs, TrackedItem, NAME_PLACEHOLDER};
use crate::fetch::SnapshotSource;
use crate::notify::{NotificationSink, ReportSink};
use crate::stores::{HistoryStore, ItemStore};
use crate::telemetry::ErrorTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Scheduler cycle state, published for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    FetchingBatch,
    ProcessingBatch,
    Sleeping,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleState::Idle => write!(f, "idle"),
            CycleState::FetchingBatch => write!(f, "fetching_batch"),
            CycleState::ProcessingBatch => write!(f, "processing_batch"),
            CycleState::Sleeping => write!(f, "sleeping"),
        }
    }
}

/// Outcome of processing one item; exactly one of processed/error counts,
/// a skip counts as neither
enum ItemOutcome {
    Processed { notified: bool },
    Skipped,
    Failed,
}

/// Dependencies cloned into each per-item task
#[derive(Clone)]
struct ProcessDeps {
    items: Arc<dyn ItemStore>,
    history: Arc<dyn HistoryStore>,
    source: Arc<dyn SnapshotSource>,
    notifier: Arc<dyn NotificationSink>,
    page_url_template: String,
}

impl ProcessDeps {
    fn page_url(&self, external_id: i64) -> String {
        self.page_url_template
            .replace("{id}", &external_id.to_string())
    }
}

/// The continuous polling loop
pub struct MonitorScheduler {
    deps: ProcessDeps,
    reports: Arc<dyn ReportSink>,
    tracker: Arc<ErrorTracker>,
    cfg: MonitorConfig,
    state_tx: watch::Sender<CycleState>,
}

impl MonitorScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        items: Arc<dyn ItemStore>,
        history: Arc<dyn HistoryStore>,
        source: Arc<dyn SnapshotSource>,
        notifier: Arc<dyn NotificationSink>,
        reports: Arc<dyn ReportSink>,
        tracker: Arc<ErrorTracker>,
        cfg: MonitorConfig,
        marketplace: &MarketplaceConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(CycleState::Idle);
        Self {
            deps: ProcessDeps {
                items,
                history,
                source,
                notifier,
                page_url_template: marketplace.page_url_template.clone(),
            },
            reports,
            tracker,
            cfg,
            state_tx,
        }
    }

    /// Observe cycle state transitions
    pub fn state(&self) -> watch::Receiver<CycleState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: CycleState) {
        let _ = self.state_tx.send(state);
    }

    /// Run cycles until `shutdown` flips to true.
    ///
    /// Cancellation is cooperative: observed between cycles, between
    /// batches and mid-batch; outstanding item tasks are aborted and
    /// drained as a group.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Monitor loop started (poll every {}s, batches of {})",
            self.cfg.poll_interval_secs, self.cfg.batch_size
        );

        let mut hourly = HourlyAccumulator::new(self.cfg.report_every_cycles());
        let poll = Duration::from_secs(self.cfg.poll_interval_secs);

        while !*shutdown.borrow() {
            let metrics = self.run_cycle(&mut shutdown).await;
            if *shutdown.borrow() {
                break;
            }

            if let Some(metrics) = metrics {
                info!(
                    "Cycle finished: processed={}, errors={}, notifications={}",
                    metrics.processed, metrics.errors, metrics.notifications
                );

                if let Some(totals) = hourly.roll(metrics) {
                    let report = HourlyAccumulator::format_report(
                        totals,
                        self.cfg.poll_interval_secs,
                    );
                    if let Err(e) = self.reports.deliver(&report).await {
                        error!("Failed to deliver hourly report: {}", e);
                    }
                }

                self.tracker.check_and_alert().await;
            }

            self.set_state(CycleState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.set_state(CycleState::Idle);
        info!("Monitor loop stopped");
    }

    /// Run one full pass over the tracked set.
    ///
    /// Returns `None` when there was nothing to do (empty set or the store
    /// was unreadable).
    pub async fn run_cycle(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<CycleMetrics> {
        self.set_state(CycleState::FetchingBatch);

        let items = match self.deps.items.all_tracked().await {
            Ok(items) => items,
            Err(e) => {
                error!("Failed to load tracked items: {}", e);
                return None;
            }
        };
        if items.is_empty() {
            debug!("No tracked items, nothing to monitor");
            return None;
        }
        info!("Starting cycle over {} tracked items", items.len());

        let mut metrics = CycleMetrics::default();
        let batches = items.chunks(self.cfg.batch_size);
        let batch_count = batches.len();

        for (batch_no, batch) in batches.enumerate() {
            if *shutdown.borrow() {
                return Some(metrics);
            }
            self.set_state(CycleState::ProcessingBatch);

            let mut tasks: JoinSet<ItemOutcome> = JoinSet::new();
            for item in batch {
                let deps = self.deps.clone();
                let item = item.clone();
                tasks.spawn(async move { process_item(deps, item).await });
            }

            // Await the whole batch; a shutdown aborts and drains the group
            loop {
                tokio::select! {
                    joined = tasks.join_next() => {
                        match joined {
                            Some(Ok(outcome)) => match outcome {
                                ItemOutcome::Processed { notified } => {
                                    metrics.processed += 1;
                                    if notified {
                                        metrics.notifications += 1;
                                    }
                                }
                                ItemOutcome::Skipped => {}
                                ItemOutcome::Failed => metrics.errors += 1,
                            },
                            Some(Err(e)) => {
                                error!("Item task panicked: {}", e);
                                metrics.errors += 1;
                            }
                            None => break,
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Cancellation requested, draining batch tasks");
                            tasks.shutdown().await;
                            return Some(metrics);
                        }
                    }
                }
            }

            if batch_no + 1 < batch_count {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(self.cfg.batch_pause_secs)) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        Some(metrics)
    }
}

/// Process one tracked item end to end.
///
/// Failures are converted to an outcome here and never reach sibling
/// tasks.
async fn process_item(deps: ProcessDeps, item: TrackedItem) -> ItemOutcome {
    let prefs = match deps.items.owner_prefs(item.owner_id).await {
        Ok(prefs) => prefs,
        Err(e) => {
            warn!("[nm={}] Owner preferences unavailable: {}", item.external_id, e);
            return ItemOutcome::Failed;
        }
    };

    let Some(snapshot) = deps.source.fetch(item.external_id, prefs.region).await else {
        info!(
            "[nm={}] No data received (possibly challenged), keeping baseline",
            item.external_id
        );
        return ItemOutcome::Failed;
    };

    // Variant selection: products with real variants need a stored selector
    let variant = if snapshot.has_real_variants() {
        let Some(selector) = item.variant.as_deref() else {
            debug!(
                "[nm={}] No variant selected yet, skipping",
                item.external_id
            );
            return ItemOutcome::Skipped;
        };
        match snapshot.variant_named(selector) {
            Some(variant) => variant,
            None => {
                warn!(
                    "[nm={}] Selected variant '{}' not found among {} blocks",
                    item.external_id,
                    selector,
                    snapshot.variants.len()
                );
                return ItemOutcome::Failed;
            }
        }
    } else {
        match snapshot.sole_variant() {
            Some(variant) => variant,
            None => {
                warn!("[nm={}] Snapshot has no variant blocks", item.external_id);
                return ItemOutcome::Failed;
            }
        }
    };
    let obs = Observation::from(variant);

    if item.name == NAME_PLACEHOLDER && !snapshot.name.is_empty() {
        if let Err(e) = deps.items.update_name(item.id, &snapshot.name).await {
            warn!("[nm={}] Name refresh failed: {}", item.external_id, e);
        }
    }

    let fired = policy::evaluate(&item, obs, prefs.tier.stock_alerts());
    let update = policy::baseline_update(&item, obs);

    if let Err(e) = deps
        .items
        .update_price_and_stock(item.id, update.basic, update.sale, update.qty, update.out_of_stock)
        .await
    {
        warn!("[nm={}] Baseline write failed: {}", item.external_id, e);
        return ItemOutcome::Failed;
    }

    if policy::should_append_history(&item, obs) {
        if let Err(e) = deps.history.append(item.id, obs.basic, obs.sale, obs.qty).await {
            warn!("[nm={}] History append failed: {}", item.external_id, e);
            return ItemOutcome::Failed;
        }
    }

    if fired.any() {
        let text = compose_message(&deps, &item, &fired, obs, &prefs);
        // best-effort: a refused recipient never aborts the cycle
        if let Err(e) = deps.notifier.deliver(item.owner_id, &text).await {
            warn!(
                "[owner={}] Notification delivery failed: {}",
                item.owner_id, e
            );
        }
    }

    ItemOutcome::Processed {
        notified: fired.any(),
    }
}

fn compose_message(
    deps: &ProcessDeps,
    item: &TrackedItem,
    fired: &policy::NotifySet,
    obs: Observation,
    prefs: &OwnerPrefs,
) -> String {
    let url = deps.page_url(item.external_id);
    let name = item.display_name();
    let mut msg = String::new();

    if fired.price_drop {
        let old = item.last_sale_price.unwrap_or(obs.sale);
        let diff = old - obs.sale;
        let diff_percent = if old > 0 {
            diff as f64 / old as f64 * 100.0
        } else {
            0.0
        };
        msg.push_str(&format!(
            "🔔 Price dropped!\n\n📦 {name}\n🔗 {url}\n\n\
             💰 Now: {} ₽\n📉 Was: {} ₽\n✅ Savings: {} ₽ ({:.1}%)\n",
            obs.sale, old, diff, diff_percent
        ));
    }

    if fired.stock_out {
        msg.push_str(&format!("\n⚠️ Out of stock!\n\n📦 {name}\n🔗 {url}\n"));
    }

    if fired.stock_in {
        msg.push_str(&format!("\n✅ Back in stock!\n\n📦 {name}\n🔗 {url}\n"));
        if prefs.tier.shows_quantity() && obs.qty > 0 {
            msg.push_str(&format!("📦 Remaining: {} pcs\n", obs.qty));
        }
    }

    msg
}
