//! Upstream fetching: HTTP client, retry policy and the rate-limited
//! orchestrator

pub mod client;
pub mod orchestrator;
pub mod retry;

use crate::domain::ProductSnapshot;
use async_trait::async_trait;

pub use client::MarketplaceClient;
pub use orchestrator::PriceFetcher;
pub use retry::RetryPolicy;

/// Source of product snapshots consumed by the scheduler.
///
/// Failures never surface here; an unfetchable item is `None`.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, external_id: i64, region: i32) -> Option<ProductSnapshot>;
}
