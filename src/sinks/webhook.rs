use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{Record, Sink};
use crate::config::WebhookSettings;

/// Posts each record as a flat JSON object to a spreadsheet web app
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_settings(settings: &WebhookSettings) -> Result<Self> {
        let url = settings
            .url
            .as_deref()
            .context("webhook sink selected but webhook.url is not set")?;
        Self::new(url, Duration::from_millis(settings.timeout_ms))
    }
}

/// The script answers 200 even when it rejects a row, so look inside the body.
fn check_reply(body: &str) -> Result<()> {
    let Ok(reply) = serde_json::from_str::<Value>(body) else {
        return Ok(());
    };
    if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
        match error.as_str() {
            Some(message) => bail!("webhook rejected record: {}", message),
            None => bail!("webhook rejected record: {}", error),
        }
    }
    if reply.get("status").and_then(Value::as_str) == Some("error") {
        let message = reply
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        bail!("webhook returned status error: {}", message);
    }
    Ok(())
}

#[async_trait]
impl<T: Record> Sink<T> for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn persist(&self, record: &T) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("callback", "callback")])
            .json(&record.webhook_body())
            .send()
            .await
            .context("Failed to reach webhook")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("webhook answered {}: {}", status, body);
        }
        debug!("📡 Webhook response for {}: {}", record.describe(), body);
        check_reply(&body)
    }
}
