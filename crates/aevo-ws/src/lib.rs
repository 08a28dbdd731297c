//! WebSocket session layer for the Aevo exchange.
//!
//! Provides a resilient, authenticated connection with:
//! - Explicit connection state machine (`ConnectionManager`)
//! - Bounded send retry and epoch-guarded reconnection
//! - Ordered subscription replay after every reconnect
//! - Request-id correlation of subscription acknowledgements
//! - Periodic ping heartbeat
//! - Channel routing of inbound frames (`MessageDispatcher`)
//!
//! The socket sits behind the `Connector` trait so tests can substitute
//! `MockConnector`.

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;
pub mod transport;

pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStats, ReconnectReason, Received,
    SendOutcome,
};
pub use dispatcher::{FrameHandler, MessageDispatcher};
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatMonitor, HeartbeatStats};
pub use message::{
    auth_frame, channel_frame, parse_frame, subscribe_frame, ticker_channel, AuthCredentials,
    InboundFrame, FILLS_CHANNEL, ORDERS_CHANNEL, TICKER_PREFIX,
};
pub use subscription::{AckStatus, AckTracker, PendingAck, SubscriptionRegistry};
pub use transport::{
    BoxFuture, Connector, FrameSink, FrameStream, MockConnector, MockSendFailure, Transport,
    TungsteniteConnector,
};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
