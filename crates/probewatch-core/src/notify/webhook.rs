//! Webhook delivery of down alerts.
//!
//! Each alert is POSTed once to every configured webhook. A mail relay
//! behind the webhook turns it into the actual email.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{DownAlert, NotifyError};

/// Configuration for a single webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The URL to POST payloads to.
    pub url: String,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,

    /// Optional HMAC-SHA256 signing secret for the `X-Probewatch-Signature-256` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

/// The JSON envelope POSTed to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub version: u8,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub alert_type: &'static str,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub unique_id: String,
    pub url: String,
    pub stale_for_ms: u64,
}

impl AlertPayload {
    pub fn from_alert(alert: &DownAlert) -> Self {
        Self {
            version: 1,
            id: alert.id.clone(),
            timestamp: alert.timestamp,
            alert_type: "endpoint_down",
            to: alert.recipient.clone(),
            subject: alert.subject.clone(),
            body: alert.body.clone(),
            unique_id: alert.unique_id.clone(),
            url: alert.full_url.clone(),
            stale_for_ms: alert.stale_for_ms,
        }
    }
}

/// Background task draining the alert channel. Returns when all senders are dropped.
pub struct AlertDispatcher {
    rx: mpsc::UnboundedReceiver<DownAlert>,
    webhooks: Vec<WebhookConfig>,
    client: Client,
}

impl AlertDispatcher {
    pub fn new(
        rx: mpsc::UnboundedReceiver<DownAlert>,
        webhooks: Vec<WebhookConfig>,
        client: Client,
    ) -> Self {
        Self {
            rx,
            webhooks,
            client,
        }
    }

    pub async fn run(mut self) {
        debug!(webhook_count = self.webhooks.len(), "Alert dispatcher started");

        while let Some(alert) = self.rx.recv().await {
            if self.webhooks.is_empty() {
                info!(
                    unique_id = %alert.unique_id,
                    to = %alert.recipient,
                    subject = %alert.subject,
                    body = %alert.body,
                    "No webhook configured, alert logged only"
                );
                continue;
            }

            let payload = AlertPayload::from_alert(&alert);
            let json_bytes = match serde_json::to_vec(&payload) {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize alert payload");
                    continue;
                }
            };

            for wh in &self.webhooks {
                let timeout = Duration::from_millis(wh.timeout_ms);
                match deliver(&self.client, &wh.url, &json_bytes, wh.secret.as_deref(), timeout).await {
                    Ok(()) => info!(url = %wh.url, unique_id = %alert.unique_id, "Down alert delivered"),
                    Err(e) => warn!(
                        url = %wh.url,
                        unique_id = %alert.unique_id,
                        error = %e,
                        "Down alert delivery failed"
                    ),
                }
            }
        }

        debug!("Alert dispatcher shutting down");
    }
}

async fn deliver(
    client: &Client,
    url: &str,
    body: &[u8],
    secret: Option<&str>,
    timeout: Duration,
) -> Result<(), NotifyError> {
    let mut req = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("User-Agent", concat!("probewatch/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .body(body.to_vec());

    if let Some(secret) = secret {
        let signature = sign_payload(body, secret)?;
        req = req.header("X-Probewatch-Signature-256", format!("sha256={}", signature));
    }

    match req.send().await {
        Ok(resp) if resp.status().is_success() => Ok(()),
        Ok(resp) => Err(NotifyError::Delivery(format!(
            "HTTP {} from {}",
            resp.status(),
            url
        ))),
        Err(e) => Err(NotifyError::Delivery(format!("request to {} failed: {}", url, e))),
    }
}

fn sign_payload(body: &[u8], secret: &str) -> Result<String, NotifyError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Delivery(format!("invalid signing key: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
