//! Rate-limited fetch orchestrator
//!
//! Wraps the marketplace client with a process-wide concurrency cap,
//! pre-fetch jitter, hard timeouts and one uniform retry policy. Upstream
//! rejections invalidate the session so the next attempt rebuilds it.

use super::client::MarketplaceClient;
use super::retry::RetryPolicy;
use super::SnapshotSource;
use crate::config::FetchConfig;
use crate::domain::ProductSnapshot;
use crate::error::{Result, WatchError};
use crate::session::SessionManager;
use crate::telemetry::{ErrorCategory, ErrorTracker};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Concurrency-capped, retrying snapshot fetcher
pub struct PriceFetcher {
    client: MarketplaceClient,
    session: Option<Arc<SessionManager>>,
    tracker: Arc<ErrorTracker>,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    jitter_ms: (u64, u64),
    timeout_secs: u64,
}

impl PriceFetcher {
    /// `session: None` uses the plain endpoint; `Some` routes every fetch
    /// through the hardened endpoint with a managed context.
    pub fn new(
        client: MarketplaceClient,
        session: Option<Arc<SessionManager>>,
        tracker: Arc<ErrorTracker>,
        cfg: &FetchConfig,
    ) -> Self {
        Self {
            client,
            session,
            tracker,
            semaphore: Arc::new(Semaphore::new(cfg.concurrency)),
            retry: RetryPolicy::from(&cfg.retry),
            jitter_ms: (cfg.jitter_min_ms, cfg.jitter_max_ms),
            timeout_secs: cfg.timeout_secs,
        }
    }

    pub fn client(&self) -> &MarketplaceClient {
        &self.client
    }

    /// Run the session warm-up protocol, issuing low-stakes detail requests
    /// through a throwaway context. No-op in plain mode.
    pub async fn warm_up(&self) -> bool {
        let Some(manager) = &self.session else {
            return true;
        };
        let client = self.client.clone();
        let region = client.default_region();

        manager
            .warm_up(move |ctx, item_id| {
                let client = client.clone();
                Box::pin(async move {
                    client
                        .fetch_detail_with_session(item_id, region, &ctx)
                        .await
                        .is_ok()
                })
            })
            .await
    }

    async fn attempt(&self, external_id: i64, region: i32) -> Result<ProductSnapshot> {
        match &self.session {
            Some(manager) => {
                let ctx = manager.acquire().await?;
                let result = self
                    .client
                    .fetch_detail_with_session(external_id, region, &ctx)
                    .await;
                if let Err(e) = &result {
                    if e.is_rejection() {
                        manager.invalidate().await;
                    }
                }
                result
            }
            None => self.client.fetch_detail(external_id, region).await,
        }
    }
}

#[async_trait]
impl SnapshotSource for PriceFetcher {
    async fn fetch(&self, external_id: i64, region: i32) -> Option<ProductSnapshot> {
        let _permit = self.semaphore.acquire().await.ok()?;

        let jitter = rand::thread_rng().gen_range(self.jitter_ms.0..=self.jitter_ms.1);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        for attempt in 0..self.retry.max_attempts {
            let outcome =
                tokio::time::timeout(Duration::from_secs(self.timeout_secs), self.attempt(external_id, region))
                    .await;

            let err = match outcome {
                Ok(Ok(snapshot)) => {
                    self.tracker.track_success();
                    debug!("[nm={}] Snapshot fetched", external_id);
                    return Some(snapshot);
                }
                Ok(Err(e)) => e,
                Err(_) => WatchError::FetchTimeout(self.timeout_secs),
            };

            self.tracker.track_error(
                ErrorCategory::from_error(&err),
                Some(external_id),
                Some(err.to_string()),
            );

            if attempt + 1 < self.retry.max_attempts {
                let delay = self.retry.delay(attempt);
                warn!(
                    "[nm={}] Fetch attempt {} failed ({}), retrying in {:?}",
                    external_id,
                    attempt + 1,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
            } else {
                warn!(
                    "[nm={}] Fetch failed after {} attempts: {}",
                    external_id, self.retry.max_attempts, err
                );
            }
        }

        None
    }
}
