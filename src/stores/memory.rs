//! In-memory store for tests and dry runs

use super::{HistoryStore, ItemStore};
use crate::domain::{OwnerPrefs, PlanTier, PriceSample, TrackedItem};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// HashMap-backed ItemStore + HistoryStore
pub struct MemoryStore {
    items: RwLock<HashMap<i64, TrackedItem>>,
    prefs: RwLock<HashMap<i64, OwnerPrefs>>,
    samples: RwLock<Vec<PriceSample>>,
    default_prefs: OwnerPrefs,
}

impl MemoryStore {
    pub fn new(default_region: i32) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            prefs: RwLock::new(HashMap::new()),
            samples: RwLock::new(Vec::new()),
            default_prefs: OwnerPrefs {
                region: default_region,
                tier: PlanTier::Free,
            },
        }
    }

    pub async fn insert_item(&self, item: TrackedItem) {
        self.items.write().await.insert(item.id, item);
    }

    pub async fn set_prefs(&self, owner_id: i64, prefs: OwnerPrefs) {
        self.prefs.write().await.insert(owner_id, prefs);
    }

    pub async fn item(&self, id: i64) -> Option<TrackedItem> {
        self.items.read().await.get(&id).cloned()
    }

    pub async fn samples(&self) -> Vec<PriceSample> {
        self.samples.read().await.clone()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn all_tracked(&self) -> Result<Vec<TrackedItem>> {
        let mut items: Vec<TrackedItem> = self.items.read().await.values().cloned().collect();
        items.sort_by_key(|i| i.id);
        Ok(items)
    }

    async fn update_price_and_stock(
        &self,
        id: i64,
        basic: i64,
        sale: i64,
        qty: i64,
        out_of_stock: bool,
    ) -> Result<()> {
        if let Some(item) = self.items.write().await.get_mut(&id) {
            item.last_basic_price = Some(basic);
            item.last_sale_price = Some(sale);
            item.last_qty = Some(qty);
            item.out_of_stock = out_of_stock;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_name(&self, id: i64, name: &str) -> Result<()> {
        if let Some(item) = self.items.write().await.get_mut(&id) {
            item.name = name.to_string();
        }
        Ok(())
    }

    async fn owner_prefs(&self, owner_id: i64) -> Result<OwnerPrefs> {
        Ok(self
            .prefs
            .read()
            .await
            .get(&owner_id)
            .copied()
            .unwrap_or(self.default_prefs))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn oldest_update(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .items
            .read()
            .await
            .values()
            .map(|i| i.updated_at)
            .min())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, item_id: i64, basic: i64, sale: i64, qty: i64) -> Result<()> {
        self.samples.write().await.push(PriceSample {
            item_id,
            basic,
            sale,
            qty,
            captured_at: Utc::now(),
        });
        Ok(())
    }
}
