//! Order submission seam.
//!
//! `GridEngine` and the application submit frames through [`OrderSender`] so
//! tests can record submissions without a socket.

use aevo_ws::{BoxFuture, ConnectionManager, SendOutcome};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Sends order command frames.
pub trait OrderSender: Send + Sync {
    /// Submit a frame; resolves once the frame was written or dropped.
    fn send(&self, frame: Value) -> BoxFuture<'_, SendOutcome>;
}

/// Production sender writing through the shared [`ConnectionManager`].
pub struct WsOrderSender {
    connection: Arc<ConnectionManager>,
}

impl WsOrderSender {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }
}

impl OrderSender for WsOrderSender {
    fn send(&self, frame: Value) -> BoxFuture<'_, SendOutcome> {
        Box::pin(async move { self.connection.send(&frame).await })
    }
}

/// Mock sender for testing.
#[derive(Debug)]
pub struct MockOrderSender {
    /// Recorded frames for verification.
    sends: Mutex<Vec<Value>>,
    /// Outcome returned for every send.
    next_outcome: Mutex<SendOutcome>,
}

impl Default for MockOrderSender {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOrderSender {
    pub fn new() -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            next_outcome: Mutex::new(SendOutcome::Sent),
        }
    }

    pub fn set_outcome(&self, outcome: SendOutcome) {
        *self.next_outcome.lock() = outcome;
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sends.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().len()
    }
}

impl OrderSender for MockOrderSender {
    fn send(&self, frame: Value) -> BoxFuture<'_, SendOutcome> {
        Box::pin(async move {
            self.sends.lock().push(frame);
            *self.next_outcome.lock()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aevo_ws::{ConnectionConfig, MockConnector};
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_records_frames() {
        let sender = MockOrderSender::new();
        assert_eq!(sender.send(json!({"op": "a"})).await, SendOutcome::Sent);
        sender.set_outcome(SendOutcome::Dropped);
        assert_eq!(sender.send(json!({"op": "b"})).await, SendOutcome::Dropped);
        assert_eq!(sender.send_count(), 2);
        assert_eq!(sender.sent()[1]["op"], "b");
    }

    #[tokio::test]
    async fn test_ws_sender_writes_through_connection() {
        let connector = MockConnector::new();
        let config = ConnectionConfig {
            url: "ws://mock".into(),
            ..ConnectionConfig::default()
        };
        let conn = Arc::new(ConnectionManager::new(config, Arc::new(connector.clone())));
        conn.open().await.unwrap();

        let sender = WsOrderSender::new(conn);
        let outcome = sender.send(json!({"op": "cancel_all_orders", "data": {}})).await;
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(connector.sent(0).len(), 1);
    }
}
