//! Outbound notification ports

pub mod webhook;

use crate::error::Result;
use async_trait::async_trait;

pub use webhook::WebhookNotifier;

/// Per-owner notification delivery.
///
/// Callers treat delivery as best-effort; a failed delivery must never
/// abort the cycle that produced it.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, owner_id: i64, text: &str) -> Result<()>;
}

/// Operator-facing reports (hourly summaries, health digests)
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<()>;
}

/// Log-only sink used when no webhook is configured
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, owner_id: i64, text: &str) -> Result<()> {
        tracing::info!("[owner={}] Notification:\n{}", owner_id, text);
        Ok(())
    }
}

#[async_trait]
impl ReportSink for LogSink {
    async fn deliver(&self, text: &str) -> Result<()> {
        tracing::info!("Report:\n{}", text);
        Ok(())
    }
}
