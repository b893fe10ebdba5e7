//! Down alerts and the seam to the delivery transport.
//!
//! The scheduler only decides that an alert is due and builds it. A
//! [`Notifier`] hands it off; [`ChannelNotifier`] pushes it onto an mpsc
//! channel drained by the background [`AlertDispatcher`].

mod webhook;

pub use webhook::{AlertDispatcher, AlertPayload, WebhookConfig};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const DOWN_ALERT_SUBJECT: &str = "Unique ID Down Alert";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownAlert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub unique_id: String,
    pub full_url: String,
    pub stale_for_ms: u64,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl DownAlert {
    pub fn new(
        unique_id: impl Into<String>,
        full_url: impl Into<String>,
        stale_for: Duration,
        recipient: impl Into<String>,
    ) -> Self {
        let unique_id = unique_id.into();
        let body = format!(
            "The unique ID {} has been down for more than {}.",
            unique_id,
            format_duration(stale_for)
        );
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            unique_id,
            full_url: full_url.into(),
            stale_for_ms: stale_for.as_millis() as u64,
            recipient: recipient.into(),
            subject: DOWN_ALERT_SUBJECT.to_string(),
            body,
        }
    }
}

/// Human-readable `1h 02m 03s` form, dropping leading zero units.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("alert channel closed")]
    ChannelClosed,
    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

/// Requests delivery of a down alert. Callers treat errors as best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &DownAlert) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<DownAlert>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::UnboundedSender<DownAlert>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, alert: &DownAlert) -> Result<(), NotifyError> {
        self.tx
            .send(alert.clone())
            .map_err(|_| NotifyError::ChannelClosed)
    }
}

pub fn alert_channel() -> (mpsc::UnboundedSender<DownAlert>, mpsc::UnboundedReceiver<DownAlert>) {
    mpsc::unbounded_channel()
}
