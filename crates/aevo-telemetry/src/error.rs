//! Telemetry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Logging initialization failed: {0}")]
    LoggingInit(String),

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("Webhook returned HTTP {status}: {body}")]
    WebhookStatus { status: u16, body: String },
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
