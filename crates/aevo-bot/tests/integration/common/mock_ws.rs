//! Mock Aevo WebSocket server for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections and acknowledge `auth` / `subscribe` requests
//! - Record received text frames per connection
//! - Push frames to the live connection and drop it on demand

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

enum Outbound {
    Text(String),
    Drop,
}

#[derive(Default)]
struct Shared {
    /// Received frames, one list per accepted connection.
    received: Vec<Vec<String>>,
    /// Outbound channel of each connection.
    senders: Vec<mpsc::UnboundedSender<Outbound>>,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    shared: Arc<Mutex<Shared>>,
}

impl MockWsServer {
    /// Start a new mock WebSocket server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let shared_clone = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        let index = {
                            let mut guard = shared_clone.lock().await;
                            guard.received.push(Vec::new());
                            guard.senders.push(tx);
                            guard.received.len() - 1
                        };
                        tokio::spawn(handle_connection(stream, index, rx, shared_clone.clone()));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            shared,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> usize {
        self.shared.lock().await.received.len()
    }

    /// Frames received on connection `index`, parsed as JSON.
    pub async fn received(&self, index: usize) -> Vec<Value> {
        self.shared
            .lock()
            .await
            .received
            .get(index)
            .map(|frames| {
                frames
                    .iter()
                    .filter_map(|f| serde_json::from_str(f).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Frames with `"op": op` received on connection `index`.
    pub async fn received_op(&self, index: usize, op: &str) -> Vec<Value> {
        self.received(index)
            .await
            .into_iter()
            .filter(|f| f["op"] == op)
            .collect()
    }

    /// Push a text frame on the most recent connection.
    pub async fn push(&self, text: String) {
        if let Some(tx) = self.shared.lock().await.senders.last() {
            let _ = tx.send(Outbound::Text(text));
        }
    }

    /// Drop the most recent connection without a close handshake.
    pub async fn drop_connection(&self) {
        if let Some(tx) = self.shared.lock().await.senders.last() {
            let _ = tx.send(Outbound::Drop);
        }
    }

    /// Poll until `check` holds or two seconds pass.
    pub async fn wait_for<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if check().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    index: usize,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Mutex<Shared>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    shared.lock().await.received[index].push(text.clone());

                    // Acknowledge requests that carry an id.
                    if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                        let op = parsed["op"].as_str().unwrap_or_default();
                        if let (Some(id), "auth" | "subscribe") = (parsed["id"].as_u64(), op) {
                            let ack = json!({"id": id, "data": {"success": true}});
                            let _ = write.send(Message::Text(ack.to_string())).await;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Some(Outbound::Drop) | None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
