// notify.rs
// Outbound security notices. Delivery runs detached from the state transition that triggered it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const TEMPLATE_ENABLED: &str = "two_factor_enabled";
pub const TEMPLATE_DISABLED: &str = "two_factor_disabled";
pub const TEMPLATE_BACKUP_CODES: &str = "two_factor_backup_codes";
pub const TEMPLATE_BACKUP_CODE_USED: &str = "two_factor_backup_code_used";

/// "Send template to address" capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, address: &str, template: &str, data: Value) -> Result<()>;
}

/// Logs the notice instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, address: &str, template: &str, data: Value) -> Result<()> {
        tracing::info!(address, template, %data, "notification (log only)");
        Ok(())
    }
}

/// POSTs `{address, template, data}` as JSON to a mail relay.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, address: &str, template: &str, data: Value) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({
                "address": address,
                "template": template,
                "data": data,
            }))
            .send()
            .await
            .context("notification relay unreachable")?
            .error_for_status()
            .context("notification relay rejected message")?;
        Ok(())
    }
}

/// Fire-and-forget front for a [`Notifier`].
///
/// Failures are logged and never reach the caller, so a committed record
/// change is never undone by a mail problem.
#[derive(Clone)]
pub struct NotificationSink {
    notifier: Arc<dyn Notifier>,
}

impl NotificationSink {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn dispatch(&self, address: &str, template: &'static str, data: Value) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            if let Err(e) = notifier.send(&address, template, data).await {
                tracing::warn!(template, error = %e, "notification delivery failed");
            }
        })
    }
}
