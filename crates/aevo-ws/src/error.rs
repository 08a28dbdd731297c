//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("No live connection")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("Shutdown in progress")]
    Shutdown,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Whether the error means the underlying socket is gone.
    ///
    /// Such failures are worth one retransmission on a fresh connection;
    /// anything else is dropped.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::NotConnected)
    }
}

pub type WsResult<T> = Result<T, WsError>;
