//! Inbound frame dispatch.
//!
//! [`MessageDispatcher::run`] pulls frames from the [`ConnectionManager`] one
//! at a time and awaits the matching [`FrameHandler`] callback before reading
//! the next frame, so a slow handler applies back-pressure to the socket.

use crate::connection::{ConnectionManager, ReconnectReason, Received};
use crate::error::WsError;
use crate::message::{parse_frame, InboundFrame};
use crate::transport::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Application callbacks for routed channel payloads.
pub trait FrameHandler: Send + Sync {
    /// `ticker:<asset>` payload.
    fn on_ticker(&self, asset: String, data: Value) -> BoxFuture<'_, ()>;

    /// `orders` payload.
    fn on_orders(&self, data: Value) -> BoxFuture<'_, ()>;

    /// `fills` payload.
    fn on_fills(&self, data: Value) -> BoxFuture<'_, ()>;

    /// Called for every frame that could not be decoded.
    fn on_decode_error(&self, _error: &WsError) {}

    /// Called for every routed or acknowledged frame, keyed by kind.
    fn on_frame(&self, _kind: &'static str) {}
}

pub struct MessageDispatcher {
    connection: Arc<ConnectionManager>,
    handler: Arc<dyn FrameHandler>,
}

impl MessageDispatcher {
    pub fn new(connection: Arc<ConnectionManager>, handler: Arc<dyn FrameHandler>) -> Self {
        Self {
            connection,
            handler,
        }
    }

    /// Read and dispatch until shutdown.
    pub async fn run(&self) {
        info!("Message dispatcher started");
        loop {
            match self.connection.recv().await {
                Received::Text(text) => {
                    self.dispatch_text(&text).await;
                }
                Received::Timeout => {
                    info!("No traffic within receive timeout, still waiting");
                }
                Received::Closed { epoch, reason } => {
                    warn!(epoch, %reason, "Connection lost, reconnecting");
                    match self
                        .connection
                        .reconnect_from(epoch, ReconnectReason::ReadFailed)
                        .await
                    {
                        Ok(()) => {}
                        Err(WsError::Shutdown) => break,
                        Err(e) => warn!(error = %e, "Reconnect from dispatcher failed"),
                    }
                }
                Received::Replaced => {
                    debug!("Connection replaced, continuing on the new one");
                }
                Received::Shutdown => break,
            }
        }
        info!("Message dispatcher stopped");
    }

    /// Decode one text frame and route it.
    ///
    /// Undecodable frames are logged and reported to the handler; they never
    /// stop the loop.
    pub async fn dispatch_text(&self, text: &str) -> Option<&'static str> {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, raw = %truncate(text, 256), "Failed to decode frame");
                self.handler.on_decode_error(&e);
                return None;
            }
        };

        let kind = frame.kind();
        match frame {
            InboundFrame::Ack { id, success } => {
                if self.connection.resolve_ack(id, success).is_none() {
                    debug!(id, success, "Acknowledgement for untracked request");
                }
            }
            InboundFrame::Ticker { asset, data } => self.handler.on_ticker(asset, data).await,
            InboundFrame::Orders(data) => self.handler.on_orders(data).await,
            InboundFrame::Fills(data) => self.handler.on_fills(data).await,
            InboundFrame::Other { channel } => {
                debug!(?channel, "Ignoring frame");
            }
        }
        self.handler.on_frame(kind);
        Some(kind)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::message::channel_frame;
    use crate::subscription::AckStatus;
    use crate::transport::MockConnector;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        decode_errors: AtomicUsize,
    }

    impl FrameHandler for Recorder {
        fn on_ticker(&self, asset: String, _data: Value) -> BoxFuture<'_, ()> {
            Box::pin(async move { self.events.lock().push(format!("ticker:{asset}")) })
        }

        fn on_orders(&self, _data: Value) -> BoxFuture<'_, ()> {
            Box::pin(async move { self.events.lock().push("orders".into()) })
        }

        fn on_fills(&self, data: Value) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                // Slow handler: the next frame must wait for it.
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.events.lock().push(format!("fills:{}", data["fill"]["order_id"]));
            })
        }

        fn on_decode_error(&self, _error: &WsError) {
            self.decode_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (Arc<ConnectionManager>, MockConnector, Arc<Recorder>, MessageDispatcher) {
        let connector = MockConnector::new();
        let config = ConnectionConfig {
            url: "ws://mock".into(),
            auth_settle_delay_ms: 1,
            open_retry_cooldown_ms: 1,
            reconnect_delay_ms: 1,
            recv_timeout_ms: 30,
            ..ConnectionConfig::default()
        };
        let conn = Arc::new(ConnectionManager::new(config, Arc::new(connector.clone())));
        let recorder = Arc::new(Recorder::default());
        let dispatcher = MessageDispatcher::new(conn.clone(), recorder.clone());
        (conn, connector, recorder, dispatcher)
    }

    #[tokio::test]
    async fn test_routes_channels() {
        let (_conn, _connector, recorder, dispatcher) = setup();

        let ticker = channel_frame("ticker:BTC-PERP", json!({}));
        assert_eq!(dispatcher.dispatch_text(&ticker).await, Some("ticker"));
        assert_eq!(
            dispatcher.dispatch_text(r#"{"channel":"orders","data":{"orders":[]}}"#).await,
            Some("orders")
        );
        assert_eq!(
            dispatcher.dispatch_text(r#"{"channel":"trades:ETH","data":{}}"#).await,
            Some("other")
        );

        assert_eq!(*recorder.events.lock(), vec!["ticker:BTC-PERP", "orders"]);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_isolated() {
        let (_conn, _connector, recorder, dispatcher) = setup();

        assert_eq!(dispatcher.dispatch_text("{oops").await, None);
        assert_eq!(dispatcher.dispatch_text(r#"{"channel":"orders","data":{}}"#).await, Some("orders"));
        assert_eq!(recorder.decode_errors.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_ack_resolves_pending_subscription() {
        let (conn, _connector, _recorder, dispatcher) = setup();
        conn.open().await.unwrap();
        let pending = conn.subscribe("fills").await.unwrap();

        let ack = format!(r#"{{"id":{},"data":{{"success":true}}}}"#, pending.id);
        assert_eq!(dispatcher.dispatch_text(&ack).await, Some("ack"));
        assert_eq!(pending.wait(Duration::from_millis(50)).await, AckStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_run_processes_in_order_and_survives_close() {
        let (conn, connector, recorder, dispatcher) = setup();
        conn.connect().await.unwrap();
        conn.subscribe("fills").await.unwrap();

        connector.push_text(0, r#"{"channel":"fills","data":{"fill":{"order_id":"a"}}}"#);
        connector.push_text(0, "garbage");
        connector.push_text(0, r#"{"channel":"orders","data":{}}"#);
        connector.push_close(0);

        let dispatcher = Arc::new(dispatcher);
        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run().await }
        });

        // Wait for the reconnect to happen, then feed the new connection.
        for _ in 0..100 {
            if !connector.sent(1).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(connector.connection_count(), 2);
        // The fills subscription was replayed on the new connection.
        assert!(connector.sent(1)[0].contains("\"fills\""));

        connector.push_text(1, r#"{"channel":"fills","data":{"fill":{"order_id":"b"}}}"#);
        tokio::time::sleep(Duration::from_millis(80)).await;

        conn.shutdown().await;
        task.await.unwrap();

        assert_eq!(
            *recorder.events.lock(),
            vec!["fills:\"a\"", "orders", "fills:\"b\""]
        );
        assert_eq!(recorder.decode_errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
