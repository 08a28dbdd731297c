//! WebSocket frame types.
//!
//! Outbound control frames (`auth`, `subscribe`) are built here; order
//! commands live with the signer in `aevo-executor`. Inbound frames are
//! classified by [`parse_frame`].

use crate::error::{WsError, WsResult};
use serde_json::{json, Map, Value};

/// Channel carrying order status updates.
pub const ORDERS_CHANNEL: &str = "orders";
/// Channel carrying fill notifications.
pub const FILLS_CHANNEL: &str = "fills";
/// Prefix of per-asset ticker channels.
pub const TICKER_PREFIX: &str = "ticker:";

/// Ticker channel name for an instrument (`ticker:ETH-PERP`).
pub fn ticker_channel(instrument: &str) -> String {
    format!("{TICKER_PREFIX}{instrument}")
}

/// API credentials used for the session `auth` frame.
#[derive(Clone)]
pub struct AuthCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

pub fn auth_frame(id: u64, credentials: &AuthCredentials) -> Value {
    json!({
        "id": id,
        "op": "auth",
        "data": {
            "key": credentials.api_key,
            "secret": credentials.api_secret,
        }
    })
}

pub fn subscribe_frame(id: u64, channel: &str) -> Value {
    json!({
        "op": "subscribe",
        "data": [channel],
        "id": id,
    })
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Acknowledgement of a request carrying `id`.
    Ack { id: u64, success: bool },
    /// `ticker:<asset>` channel; `asset` is the text after the last `:`.
    Ticker { asset: String, data: Value },
    Orders(Value),
    Fills(Value),
    /// Anything else (other channels, unsolicited notices).
    Other { channel: Option<String> },
}

impl InboundFrame {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ack { .. } => "ack",
            Self::Ticker { .. } => "ticker",
            Self::Orders(_) => "orders",
            Self::Fills(_) => "fills",
            Self::Other { .. } => "other",
        }
    }
}

/// Decode and classify one text frame.
pub fn parse_frame(text: &str) -> WsResult<InboundFrame> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut obj) = value else {
        return Err(WsError::ParseError(format!("expected JSON object, got {text}")));
    };

    if let Some(channel) = obj.get("channel").and_then(Value::as_str).map(str::to_owned) {
        let data = obj.remove("data").unwrap_or(Value::Null);
        return Ok(route_channel(channel, data));
    }

    if let Some(id) = obj.get("id").and_then(Value::as_u64) {
        if let Some(success) = obj
            .get("data")
            .and_then(|d| d.get("success"))
            .and_then(Value::as_bool)
        {
            return Ok(InboundFrame::Ack { id, success });
        }
        if obj.contains_key("error") {
            return Ok(InboundFrame::Ack { id, success: false });
        }
    }

    Ok(InboundFrame::Other { channel: None })
}

fn route_channel(channel: String, data: Value) -> InboundFrame {
    if channel.starts_with(TICKER_PREFIX) {
        let asset = channel.rsplit(':').next().unwrap_or_default().to_string();
        InboundFrame::Ticker { asset, data }
    } else if channel == ORDERS_CHANNEL {
        InboundFrame::Orders(data)
    } else if channel == FILLS_CHANNEL {
        InboundFrame::Fills(data)
    } else {
        InboundFrame::Other {
            channel: Some(channel),
        }
    }
}

/// Wrap a channel payload the way the exchange does (test helper for
/// downstream crates).
pub fn channel_frame(channel: &str, data: Value) -> String {
    let mut obj = Map::new();
    obj.insert("channel".into(), Value::String(channel.to_string()));
    obj.insert("data".into(), data);
    Value::Object(obj).to_string()
}
