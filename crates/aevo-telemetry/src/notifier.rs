//! Webhook alerts (WeChat Work style text messages).

use crate::error::{TelemetryError, TelemetryResult};
use crate::metrics::Metrics;
use chrono::{DateTime, Local};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

/// Webhook request timeout.
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts operator alerts to a webhook.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    /// `None` (or an empty URL) disables sending; messages are only logged.
    pub fn new(webhook_url: Option<String>) -> TelemetryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .map_err(|e| TelemetryError::Notifier(e.to_string()))?;
        Ok(Self {
            client,
            webhook_url: webhook_url.filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Message body: the text followed by a local timestamp line.
    pub fn payload(message: &str, now: DateTime<Local>) -> Value {
        json!({
            "msgtype": "text",
            "text": {
                "content": format!("{message}\n{}", now.format("%Y-%m-%d %H:%M:%S")),
            }
        })
    }

    /// Post a message and report the result.
    pub async fn send(&self, message: &str) -> TelemetryResult<()> {
        let Some(url) = &self.webhook_url else {
            info!(%message, "Webhook not configured, notification skipped");
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&Self::payload(message, Local::now()))
            .send()
            .await
            .map_err(|e| TelemetryError::Notifier(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::WebhookStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Post a message; failures are logged and never propagated.
    pub async fn notify(&self, message: &str) {
        match self.send(message).await {
            Ok(()) => {
                if self.is_enabled() {
                    Metrics::notification(true);
                    info!("Notification sent");
                }
            }
            Err(e) => {
                Metrics::notification(false);
                warn!(error = %e, "Failed to send notification");
            }
        }
    }
}

/// Alert text for an order the exchange did not accept.
pub fn order_failure_message(
    symbol: &str,
    is_buy: bool,
    price: &str,
    quantity: &str,
    reason: &str,
) -> String {
    format!(
        "Symbol: {symbol}\nSide: {}\nPrice: {price}\nQuantity: {quantity}\nResult: {reason}",
        if is_buy { "buy" } else { "sell" }
    )
}
