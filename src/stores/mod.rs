//! Item and history storage ports
//!
//! Storage engine internals live behind these traits; the monitoring
//! pipeline only ever sees the operations below.

pub mod memory;
pub mod postgres;

use crate::domain::{OwnerPrefs, TrackedItem};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Tracked-item storage consumed by the monitoring pipeline.
///
/// `update_price_and_stock` and `update_name` are the only writes the
/// pipeline performs; selector and rule changes belong to the subscription
/// collaborator.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn all_tracked(&self) -> Result<Vec<TrackedItem>>;

    async fn update_price_and_stock(
        &self,
        id: i64,
        basic: i64,
        sale: i64,
        qty: i64,
        out_of_stock: bool,
    ) -> Result<()>;

    /// Replace a placeholder item name once the real one is known
    async fn update_name(&self, id: i64, name: &str) -> Result<()>;

    async fn owner_prefs(&self, owner_id: i64) -> Result<OwnerPrefs>;

    /// Cheap round-trip used by the health monitor
    async fn ping(&self) -> Result<()>;

    /// `updated_at` of the least-recently-updated tracked item
    async fn oldest_update(&self) -> Result<Option<DateTime<Utc>>>;
}

/// Append-only price history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, item_id: i64, basic: i64, sale: i64, qty: i64) -> Result<()>;
}
