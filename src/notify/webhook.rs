//! Webhook notification client
//!
//! Posts owner notifications, operator reports and telemetry alerts as JSON
//! to configured webhook endpoints.

use super::{NotificationSink, ReportSink};
use crate::error::{Result, WatchError};
use crate::telemetry::{Alert, AlertSink};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

/// Webhook delivery client
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_id: Option<i64>,
    text: &'a str,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Arc<Self> {
        Arc::new(Self {
            client: Client::new(),
            webhook_url,
        })
    }

    async fn post(&self, owner_id: Option<i64>, text: &str) -> Result<()> {
        let message = WebhookMessage { owner_id, text };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!("Webhook notification sent");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Webhook delivery failed: {} - {}", status, body);
            Err(WatchError::NotificationDelivery {
                owner: owner_id.unwrap_or_default(),
                reason: format!("HTTP {status}: {body}"),
            })
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn deliver(&self, owner_id: i64, text: &str) -> Result<()> {
        self.post(Some(owner_id), text).await
    }
}

#[async_trait]
impl ReportSink for WebhookNotifier {
    async fn deliver(&self, text: &str) -> Result<()> {
        self.post(None, text).await
    }
}

#[async_trait]
impl AlertSink for WebhookNotifier {
    async fn send(&self, alert: &Alert) -> Result<()> {
        self.post(None, &alert.format_text()).await
    }
}
