pub mod embed;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::differ::ChangeSummary;
use crate::models::WatchId;
use embed::create_embed;

/// Emitted once per check whose verdict was `changed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub watch_id: WatchId,
    pub url: String,
    pub detected_at: DateTime<Utc>,
    pub summary: ChangeSummary,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> Result<()>;
}

/// Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        info!(
            watch_id = %event.watch_id,
            url = %event.url,
            "Change detected: {}",
            event.summary.describe()
        );
        Ok(())
    }
}

pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(client: Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        let payload = json!({
            "content": format!("Change detected on {}", event.url),
            "embeds": [create_embed(event)]
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send change webhook")?;

        if response.status().is_success() {
            info!("Sent change notification for {}", event.url);
            Ok(())
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!("Webhook failed with status {}: {}", status, error_text);
            Err(anyhow::anyhow!("Webhook failed: {} - {}", status, error_text))
        }
    }
}
