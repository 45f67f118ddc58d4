//! End-to-end cycle tests against in-memory collaborators

use async_trait::async_trait;
use chrono::Utc;
use pricewatch::config::{AppConfig, MonitorConfig};
use pricewatch::domain::{
    NotifyRule, OwnerPrefs, PlanTier, PriceTag, ProductSnapshot, TrackedItem, VariantBlock,
};
use pricewatch::error::Result;
use pricewatch::fetch::SnapshotSource;
use pricewatch::monitor::MonitorScheduler;
use pricewatch::notify::{NotificationSink, ReportSink};
use pricewatch::stores::{HistoryStore, ItemStore, MemoryStore};
use pricewatch::telemetry::ErrorTracker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};

struct ScriptedSource {
    snapshots: HashMap<i64, ProductSnapshot>,
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self, external_id: i64, _region: i32) -> Option<ProductSnapshot> {
        self.snapshots.get(&external_id).cloned()
    }
}

/// Source whose fetches block until cancelled
struct StalledSource {
    gate: Arc<Notify>,
}

#[async_trait]
impl SnapshotSource for StalledSource {
    async fn fetch(&self, _external_id: i64, _region: i32) -> Option<ProductSnapshot> {
        self.gate.notified().await;
        None
    }
}

#[derive(Default)]
struct CollectingSink {
    messages: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl NotificationSink for CollectingSink {
    async fn deliver(&self, owner_id: i64, text: &str) -> Result<()> {
        self.messages.lock().await.push((owner_id, text.to_string()));
        Ok(())
    }
}

struct NullReport;

#[async_trait]
impl ReportSink for NullReport {
    async fn deliver(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

fn tracked(id: i64, external_id: i64, rule: NotifyRule, sale: Option<i64>, qty: Option<i64>) -> TrackedItem {
    TrackedItem {
        id,
        owner_id: 10,
        external_id,
        name: "widget".to_string(),
        variant: None,
        last_basic_price: sale.map(|s| s + 1000),
        last_sale_price: sale,
        last_qty: qty,
        out_of_stock: qty == Some(0),
        rule,
        updated_at: Utc::now(),
    }
}

fn single_variant(sale: i64, qty: i64) -> ProductSnapshot {
    ProductSnapshot {
        name: "widget deluxe".to_string(),
        variants: vec![VariantBlock {
            name: "0".to_string(),
            orig_name: String::new(),
            price: PriceTag {
                basic: sale + 1000,
                sale,
            },
            qty,
        }],
    }
}

fn sized_variant(size: &str, sale: i64, qty: i64) -> ProductSnapshot {
    ProductSnapshot {
        name: "sized widget".to_string(),
        variants: vec![VariantBlock {
            name: size.to_string(),
            orig_name: size.to_string(),
            price: PriceTag {
                basic: sale + 1000,
                sale,
            },
            qty,
        }],
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    sink: Arc<CollectingSink>,
    scheduler: MonitorScheduler,
}

fn harness(source: Arc<dyn SnapshotSource>) -> Harness {
    let defaults = AppConfig::default_config();
    let store = Arc::new(MemoryStore::new(defaults.marketplace.default_region));
    let sink = Arc::new(CollectingSink::default());

    let scheduler = MonitorScheduler::new(
        Arc::clone(&store) as Arc<dyn ItemStore>,
        Arc::clone(&store) as Arc<dyn HistoryStore>,
        source,
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::new(NullReport),
        Arc::new(ErrorTracker::with_defaults()),
        MonitorConfig {
            poll_interval_secs: 600,
            batch_size: 50,
            batch_pause_secs: 0,
        },
        &defaults.marketplace,
    );

    Harness {
        store,
        sink,
        scheduler,
    }
}

fn basic_tier() -> OwnerPrefs {
    OwnerPrefs {
        region: -1257786,
        tier: PlanTier::Basic,
    }
}

#[tokio::test]
async fn test_percent_drop_notifies_and_updates_baseline() {
    let source = Arc::new(ScriptedSource {
        snapshots: HashMap::from([(100, single_variant(7000, 5))]),
    });
    let h = harness(source);
    h.store
        .insert_item(tracked(1, 100, NotifyRule::Percent(10.0), Some(8000), Some(5)))
        .await;
    h.store.set_prefs(10, basic_tier()).await;

    let (_tx, mut rx) = watch::channel(false);
    let metrics = h.scheduler.run_cycle(&mut rx).await.unwrap();

    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.errors, 0);
    assert_eq!(metrics.notifications, 1);

    let item = h.store.item(1).await.unwrap();
    assert_eq!(item.last_sale_price, Some(7000));
    assert_eq!(item.last_qty, Some(5));
    assert!(!item.out_of_stock);

    let samples = h.store.samples().await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].sale, 7000);

    let messages = h.sink.messages.lock().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, 10);
    assert!(messages[0].1.contains("Price dropped"));
}

#[tokio::test]
async fn test_small_drop_below_percent_gate_is_silent() {
    let source = Arc::new(ScriptedSource {
        snapshots: HashMap::from([(100, single_variant(7900, 5))]),
    });
    let h = harness(source);
    h.store
        .insert_item(tracked(1, 100, NotifyRule::Percent(10.0), Some(8000), Some(5)))
        .await;
    h.store.set_prefs(10, basic_tier()).await;

    let (_tx, mut rx) = watch::channel(false);
    let metrics = h.scheduler.run_cycle(&mut rx).await.unwrap();

    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.notifications, 0);
    // baseline still moves with the observation
    assert_eq!(h.store.item(1).await.unwrap().last_sale_price, Some(7900));
    assert!(h.sink.messages.lock().await.is_empty());
}

#[tokio::test]
async fn test_stock_out_keeps_price_and_skips_history() {
    let source = Arc::new(ScriptedSource {
        snapshots: HashMap::from([(100, single_variant(5000, 0))]),
    });
    let h = harness(source);
    h.store
        .insert_item(tracked(1, 100, NotifyRule::Any, Some(5000), Some(3)))
        .await;
    h.store.set_prefs(10, basic_tier()).await;

    let (_tx, mut rx) = watch::channel(false);
    let metrics = h.scheduler.run_cycle(&mut rx).await.unwrap();

    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.notifications, 1);

    let item = h.store.item(1).await.unwrap();
    assert_eq!(item.last_sale_price, Some(5000));
    assert_eq!(item.last_qty, Some(0));
    assert!(item.out_of_stock);
    assert!(h.store.samples().await.is_empty());

    let messages = h.sink.messages.lock().await;
    assert!(messages[0].1.contains("Out of stock"));
}

#[tokio::test]
async fn test_stock_alerts_gated_for_free_tier() {
    let source = Arc::new(ScriptedSource {
        snapshots: HashMap::from([(100, single_variant(5000, 0))]),
    });
    let h = harness(source);
    h.store
        .insert_item(tracked(1, 100, NotifyRule::Any, Some(5000), Some(3)))
        .await;
    // owner has no stored prefs: defaults to the free tier

    let (_tx, mut rx) = watch::channel(false);
    let metrics = h.scheduler.run_cycle(&mut rx).await.unwrap();

    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.notifications, 0);
    assert!(h.sink.messages.lock().await.is_empty());
    // the stock flag flips regardless of the notification gate
    assert!(h.store.item(1).await.unwrap().out_of_stock);
}

#[tokio::test]
async fn test_unchanged_price_appends_single_history_row() {
    let source = Arc::new(ScriptedSource {
        snapshots: HashMap::from([(100, single_variant(5000, 2))]),
    });
    let h = harness(source);
    h.store
        .insert_item(tracked(1, 100, NotifyRule::Any, None, None))
        .await;

    let (_tx, mut rx) = watch::channel(false);
    // first observation establishes the baseline and appends one row
    h.scheduler.run_cycle(&mut rx).await.unwrap();
    assert_eq!(h.store.samples().await.len(), 1);

    // second cycle sees the same price: no duplicate row
    h.scheduler.run_cycle(&mut rx).await.unwrap();
    assert_eq!(h.store.samples().await.len(), 1);
}

#[tokio::test]
async fn test_missing_variant_selector_is_silent_skip() {
    let source = Arc::new(ScriptedSource {
        snapshots: HashMap::from([(100, sized_variant("42", 5000, 2))]),
    });
    let h = harness(source);
    h.store
        .insert_item(tracked(1, 100, NotifyRule::Any, None, None))
        .await;

    let (_tx, mut rx) = watch::channel(false);
    let metrics = h.scheduler.run_cycle(&mut rx).await.unwrap();

    // neither processed nor error
    assert_eq!(metrics.processed, 0);
    assert_eq!(metrics.errors, 0);
    assert_eq!(h.store.item(1).await.unwrap().last_sale_price, None);
}

#[tokio::test]
async fn test_configured_variant_is_selected() {
    let mut item = tracked(1, 100, NotifyRule::Any, Some(6000), Some(1));
    item.variant = Some("42".to_string());

    let source = Arc::new(ScriptedSource {
        snapshots: HashMap::from([(100, sized_variant("42", 5500, 4))]),
    });
    let h = harness(source);
    h.store.insert_item(item).await;
    h.store.set_prefs(10, basic_tier()).await;

    let (_tx, mut rx) = watch::channel(false);
    let metrics = h.scheduler.run_cycle(&mut rx).await.unwrap();

    assert_eq!(metrics.processed, 1);
    assert_eq!(h.store.item(1).await.unwrap().last_sale_price, Some(5500));
}

#[tokio::test]
async fn test_wrong_selector_counts_as_error() {
    let mut item = tracked(1, 100, NotifyRule::Any, None, None);
    item.variant = Some("44".to_string());

    let source = Arc::new(ScriptedSource {
        snapshots: HashMap::from([(100, sized_variant("42", 5500, 4))]),
    });
    let h = harness(source);
    h.store.insert_item(item).await;

    let (_tx, mut rx) = watch::channel(false);
    let metrics = h.scheduler.run_cycle(&mut rx).await.unwrap();

    assert_eq!(metrics.processed, 0);
    assert_eq!(metrics.errors, 1);
}

#[tokio::test]
async fn test_fetch_failure_counts_error_and_spares_siblings() {
    let source = Arc::new(ScriptedSource {
        // item 100 resolves, item 200 does not
        snapshots: HashMap::from([(100, single_variant(4000, 1))]),
    });
    let h = harness(source);
    h.store
        .insert_item(tracked(1, 100, NotifyRule::Any, Some(5000), Some(1)))
        .await;
    h.store
        .insert_item(tracked(2, 200, NotifyRule::Any, Some(5000), Some(1)))
        .await;
    h.store.set_prefs(10, basic_tier()).await;

    let (_tx, mut rx) = watch::channel(false);
    let metrics = h.scheduler.run_cycle(&mut rx).await.unwrap();

    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.errors, 1);
    // the failed sibling's baseline is untouched
    assert_eq!(h.store.item(2).await.unwrap().last_sale_price, Some(5000));
    assert_eq!(h.store.item(1).await.unwrap().last_sale_price, Some(4000));
}

#[tokio::test]
async fn test_empty_item_set_is_a_no_op() {
    let source = Arc::new(ScriptedSource {
        snapshots: HashMap::new(),
    });
    let h = harness(source);

    let (_tx, mut rx) = watch::channel(false);
    assert!(h.scheduler.run_cycle(&mut rx).await.is_none());
}

#[tokio::test]
async fn test_cancellation_drains_stalled_batch() {
    let gate = Arc::new(Notify::new());
    let source = Arc::new(StalledSource {
        gate: Arc::clone(&gate),
    });
    let h = harness(source);
    h.store
        .insert_item(tracked(1, 100, NotifyRule::Any, None, None))
        .await;

    let (tx, rx) = watch::channel(false);
    let scheduler = Arc::new(h.scheduler);
    let handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let mut rx = rx.clone();
        async move { scheduler.run_cycle(&mut rx).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    // the stalled item task is aborted as part of the drain
    let metrics = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("cycle must observe cancellation")
        .unwrap()
        .unwrap();
    assert_eq!(metrics.processed, 0);
}
