//! Anti-bot session management
//!
//! Builds and rotates the request context (headers, challenge token,
//! cookies) the hardened endpoint requires. Contexts are captured by a
//! headless browser and reused until they age out or exhaust their request
//! budget; rebuilds are serialized through a single lock so concurrent
//! callers never trigger parallel browser work.

pub mod browser;

use crate::config::{SessionConfig, WarmupConfig};
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use browser::ChromeSessionBuilder;

/// Captured request context for the hardened endpoint.
///
/// Ephemeral and never persisted; owned by the [`SessionManager`].
pub struct SessionContext {
    headers: Vec<(String, String)>,
    pub challenge_token: String,
    cookies: Vec<(String, String)>,
    created_at: Instant,
    request_count: AtomicU32,
}

impl SessionContext {
    pub fn new(
        headers: Vec<(String, String)>,
        challenge_token: String,
        cookies: Vec<(String, String)>,
    ) -> Self {
        Self {
            headers,
            challenge_token,
            cookies,
            created_at: Instant::now(),
            request_count: AtomicU32::new(0),
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn requests_served(&self) -> u32 {
        self.request_count.load(Ordering::SeqCst)
    }

    fn mark_used(&self) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Clone the shared header set with the referer rewritten to the exact
    /// page being fetched
    pub fn headers_for(&self, page_url: &str) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("referer"))
            .cloned()
            .collect();
        headers.push(("referer".to_string(), page_url.to_string()));
        headers
    }

    /// Cookie header value for an outgoing request
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Produces a fresh [`SessionContext`].
///
/// The production implementation drives a headless browser; tests
/// substitute scripted builders.
#[async_trait]
pub trait SessionBuilder: Send + Sync {
    async fn build(&self) -> Result<SessionContext>;

    /// Release any long-lived resources (browser, tab, driver)
    async fn shutdown(&self) {}
}

/// Owns the current session context and its rebuild policy
pub struct SessionManager {
    builder: Arc<dyn SessionBuilder>,
    ttl: Duration,
    max_requests: u32,
    warmup: WarmupConfig,
    probe_item_id: i64,
    slot: Mutex<Option<Arc<SessionContext>>>,
    warmed: AtomicBool,
    builds: AtomicU64,
}

impl SessionManager {
    pub fn new(builder: Arc<dyn SessionBuilder>, cfg: &SessionConfig) -> Self {
        Self {
            builder,
            ttl: cfg.ttl(),
            max_requests: cfg.max_requests,
            warmup: cfg.warmup.clone(),
            probe_item_id: cfg.probe_item_id,
            slot: Mutex::new(None),
            warmed: AtomicBool::new(false),
            builds: AtomicU64::new(0),
        }
    }

    /// Get a usable context, rebuilding synchronously when the current one
    /// has aged out or exhausted its request budget.
    ///
    /// Callers arriving during a rebuild wait on the slot lock and observe
    /// the freshly built context; a failed build leaves the manager usable
    /// for the next attempt.
    pub async fn acquire(&self) -> Result<Arc<SessionContext>> {
        let mut slot = self.slot.lock().await;

        if let Some(ctx) = slot.as_ref() {
            if ctx.age() < self.ttl && ctx.requests_served() < self.max_requests {
                ctx.mark_used();
                return Ok(Arc::clone(ctx));
            }
            debug!(
                "Session rotation: age={:?}, requests={}",
                ctx.age(),
                ctx.requests_served()
            );
            *slot = None;
        }

        let ctx = Arc::new(self.builder.build().await?);
        self.builds.fetch_add(1, Ordering::SeqCst);
        info!(
            "Session context built (token: {}…)",
            &ctx.challenge_token.chars().take(16).collect::<String>()
        );

        ctx.mark_used();
        *slot = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Drop the current context so the next acquire rebuilds.
    ///
    /// Called by the fetch orchestrator after an upstream rejection.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            info!("Session context invalidated");
        }
    }

    /// Total successful builds over the manager's lifetime
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Absorb the upstream's initial automated-traffic challenge.
    ///
    /// Builds a throwaway context and issues a few low-stakes requests
    /// through it via `probe`. Runs once per process lifetime unless
    /// [`reset_warmup`](Self::reset_warmup) is called; the outcome is
    /// advisory only.
    pub async fn warm_up<F>(&self, probe: F) -> bool
    where
        F: Fn(Arc<SessionContext>, i64) -> BoxFuture<'static, bool>,
    {
        if !self.warmup.enabled {
            return true;
        }
        if self.warmed.swap(true, Ordering::SeqCst) {
            debug!("Warm-up already performed, skipping");
            return true;
        }

        info!("Running session warm-up");
        let ctx = match self.builder.build().await {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                warn!("Warm-up session build failed (non-fatal): {}", e);
                return false;
            }
        };

        let item_ids = if self.warmup.item_ids.is_empty() {
            vec![self.probe_item_id]
        } else {
            self.warmup.item_ids.clone()
        };

        let mut successes = 0u32;
        for probe_no in 0..self.warmup.probe_requests {
            let item_id = item_ids[probe_no as usize % item_ids.len()];
            if probe(Arc::clone(&ctx), item_id).await {
                successes += 1;
            }
            let pause = rand::thread_rng().gen_range(500..1500);
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }

        let passed = successes >= self.warmup.required_successes;
        if passed {
            info!(
                "Warm-up passed ({}/{} probes succeeded)",
                successes, self.warmup.probe_requests
            );
        } else {
            warn!(
                "Warm-up below target ({}/{} probes succeeded, {} required) — continuing anyway",
                successes, self.warmup.probe_requests, self.warmup.required_successes
            );
        }
        passed
    }

    /// Allow warm-up to run again before the next monitoring run
    pub fn reset_warmup(&self) {
        self.warmed.store(false, Ordering::SeqCst);
    }

    /// Drop the current context and release builder resources
    pub async fn shutdown(&self) {
        self.slot.lock().await.take();
        self.builder.shutdown().await;
        self.reset_warmup();
        info!("Session manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::WatchError;
    use std::sync::atomic::AtomicUsize;

    struct CountingBuilder {
        builds: AtomicUsize,
        delay: Duration,
        fail: AtomicBool,
    }

    impl CountingBuilder {
        fn new(delay: Duration) -> Self {
            Self {
                builds: AtomicUsize::new(0),
                delay,
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl SessionBuilder for CountingBuilder {
        async fn build(&self) -> Result<SessionContext> {
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(WatchError::SessionUnavailable(
                    "no qualifying request intercepted".to_string(),
                ));
            }
            let n = self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(SessionContext::new(
                vec![
                    ("user-agent".to_string(), "test".to_string()),
                    ("referer".to_string(), "https://example.com/".to_string()),
                ],
                format!("token-{n}"),
                vec![("session".to_string(), "abc".to_string())],
            ))
        }
    }

    fn session_cfg() -> crate::config::SessionConfig {
        AppConfig::default_config().session
    }

    #[tokio::test]
    async fn test_context_reused_within_budget() {
        let builder = Arc::new(CountingBuilder::new(Duration::ZERO));
        let manager = SessionManager::new(builder.clone(), &session_cfg());

        let first = manager.acquire().await.unwrap();
        let second = manager.acquire().await.unwrap();
        assert_eq!(first.challenge_token, second.challenge_token);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
        assert_eq!(second.requests_served(), 2);
    }

    #[tokio::test]
    async fn test_rebuild_at_request_cap() {
        let builder = Arc::new(CountingBuilder::new(Duration::ZERO));
        let mut cfg = session_cfg();
        cfg.max_requests = 20;
        let manager = SessionManager::new(builder.clone(), &cfg);

        for _ in 0..20 {
            manager.acquire().await.unwrap();
        }
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);

        // 21st request exceeds the cap and triggers exactly one rebuild
        let ctx = manager.acquire().await.unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.challenge_token, "token-1");
    }

    #[tokio::test]
    async fn test_concurrent_acquires_single_build() {
        let builder = Arc::new(CountingBuilder::new(Duration::from_millis(50)));
        let manager = Arc::new(SessionManager::new(builder.clone(), &session_cfg()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.acquire().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let builder = Arc::new(CountingBuilder::new(Duration::ZERO));
        let manager = SessionManager::new(builder.clone(), &session_cfg());

        manager.acquire().await.unwrap();
        manager.invalidate().await;
        manager.acquire().await.unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_build_does_not_poison() {
        let builder = Arc::new(CountingBuilder::new(Duration::ZERO));
        let manager = SessionManager::new(builder.clone(), &session_cfg());

        builder.fail.store(true, Ordering::SeqCst);
        assert!(manager.acquire().await.is_err());

        builder.fail.store(false, Ordering::SeqCst);
        assert!(manager.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_warmup_runs_once() {
        let builder = Arc::new(CountingBuilder::new(Duration::ZERO));
        let mut cfg = session_cfg();
        cfg.warmup.probe_requests = 3;
        cfg.warmup.required_successes = 2;
        let manager = SessionManager::new(builder.clone(), &cfg);

        let passed = manager
            .warm_up(|_ctx, _item| Box::pin(async { true }))
            .await;
        assert!(passed);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);

        // Second invocation is a no-op
        manager.warm_up(|_ctx, _item| Box::pin(async { false })).await;
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_headers_for_rewrites_referer() {
        let ctx = SessionContext::new(
            vec![
                ("user-agent".to_string(), "ua".to_string()),
                ("referer".to_string(), "https://example.com/old".to_string()),
            ],
            "token".to_string(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
        );

        let headers = ctx.headers_for("https://example.com/catalog/42/detail.aspx");
        let referers: Vec<_> = headers
            .iter()
            .filter(|(name, _)| name == "referer")
            .collect();
        assert_eq!(referers.len(), 1);
        assert_eq!(referers[0].1, "https://example.com/catalog/42/detail.aspx");
        assert_eq!(ctx.cookie_header().unwrap(), "a=1; b=2");
    }
}
