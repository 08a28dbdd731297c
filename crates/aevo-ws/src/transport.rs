//! Transport abstraction.
//!
//! `ConnectionManager` talks to the socket only through the [`Connector`],
//! [`FrameSink`] and [`FrameStream`] traits. The production implementation
//! wraps `tokio-tungstenite`; [`MockConnector`] is an in-process double used by
//! tests in this and downstream crates.

use crate::error::{WsError, WsResult};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of a connection.
pub trait FrameSink: Send {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, WsResult<()>>;
    fn ping(&mut self) -> BoxFuture<'_, WsResult<()>>;
    fn close(&mut self) -> BoxFuture<'_, WsResult<()>>;
}

/// Read half of a connection.
///
/// Yields text frames only; control frames are handled underneath. A close
/// frame surfaces as `Err(WsError::ConnectionClosed)`, end of stream as `None`.
pub trait FrameStream: Send {
    fn next_frame(&mut self) -> BoxFuture<'_, Option<WsResult<String>>>;
}

/// A freshly opened connection, split into halves.
pub struct Transport {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens connections.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, WsResult<Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `tokio-tungstenite` backed connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, WsResult<Transport>> {
        Box::pin(async move {
            // TCP_NODELAY on
            let (ws_stream, _response) = connect_async_tls_with_config(url, None, true, None)
                .await
                .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
            let (write, read) = ws_stream.split();
            debug!(url, "WebSocket transport established");
            Ok(Transport {
                sink: Box::new(TungsteniteSink { inner: write }),
                stream: Box::new(TungsteniteStream { inner: read }),
            })
        })
    }
}

struct TungsteniteSink {
    inner: SplitSink<WsStream, Message>,
}

impl FrameSink for TungsteniteSink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, WsResult<()>> {
        Box::pin(async move { self.inner.send(Message::Text(text)).await.map_err(classify) })
    }

    fn ping(&mut self) -> BoxFuture<'_, WsResult<()>> {
        Box::pin(async move { self.inner.send(Message::Ping(Vec::new())).await.map_err(classify) })
    }

    fn close(&mut self) -> BoxFuture<'_, WsResult<()>> {
        Box::pin(async move { self.inner.close().await.map_err(classify) })
    }
}

struct TungsteniteStream {
    inner: SplitStream<WsStream>,
}

impl FrameStream for TungsteniteStream {
    fn next_frame(&mut self) -> BoxFuture<'_, Option<WsResult<String>>> {
        Box::pin(async move {
            loop {
                match self.inner.next().await? {
                    Ok(Message::Text(text)) => return Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => return Some(Ok(text)),
                        Err(e) => warn!(error = %e, "Skipping non UTF-8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1005, "no status".to_string()));
                        return Some(Err(WsError::ConnectionClosed { code, reason }));
                    }
                    Ok(_) => {}
                    Err(e) => return Some(Err(classify(e))),
                }
            }
        })
    }
}

/// Map tungstenite errors that mean "socket is gone" to `ConnectionClosed`.
fn classify(e: TungsteniteError) -> WsError {
    let closed = match &e {
        TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed => true,
        TungsteniteError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        TungsteniteError::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    };
    if closed {
        WsError::ConnectionClosed {
            code: 1006,
            reason: e.to_string(),
        }
    } else {
        WsError::Tungstenite(e)
    }
}

// ---------------------------------------------------------------------------
// Mock transport
// ---------------------------------------------------------------------------

/// Failure injected into the next mock send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSendFailure {
    /// The socket is gone (eligible for one retransmission).
    Closed,
    /// Any other send error.
    Other,
}

enum MockInbound {
    Text(String),
    Close,
}

struct MockConnection {
    sent: Arc<Mutex<Vec<String>>>,
    pings: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    inbound: mpsc::UnboundedSender<MockInbound>,
}

#[derive(Default)]
struct MockShared {
    connections: Mutex<Vec<MockConnection>>,
    failing_connects: AtomicUsize,
    send_failures: Mutex<VecDeque<MockSendFailure>>,
}

/// In-process connector for tests.
///
/// Every `connect` creates a new recorded connection. Tests push inbound
/// frames into a connection and inspect what was written to it.
#[derive(Clone, Default)]
pub struct MockConnector {
    shared: Arc<MockShared>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Queue a failure for the next send on any connection.
    pub fn fail_next_send(&self, failure: MockSendFailure) {
        self.shared.send_failures.lock().push_back(failure);
    }

    /// Number of successfully opened connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Frames written to connection `index`.
    pub fn sent(&self, index: usize) -> Vec<String> {
        self.shared
            .connections
            .lock()
            .get(index)
            .map(|c| c.sent.lock().clone())
            .unwrap_or_default()
    }

    /// Frames written to every connection, in connection order.
    pub fn all_sent(&self) -> Vec<String> {
        self.shared
            .connections
            .lock()
            .iter()
            .flat_map(|c| c.sent.lock().clone())
            .collect()
    }

    /// Pings written to connection `index`.
    pub fn pings(&self, index: usize) -> usize {
        self.shared
            .connections
            .lock()
            .get(index)
            .map(|c| c.pings.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Whether connection `index` was closed locally or remotely.
    pub fn is_closed(&self, index: usize) -> bool {
        self.shared
            .connections
            .lock()
            .get(index)
            .is_some_and(|c| c.closed.load(Ordering::SeqCst))
    }

    /// Deliver a text frame on connection `index`.
    pub fn push_text(&self, index: usize, text: impl Into<String>) {
        if let Some(c) = self.shared.connections.lock().get(index) {
            let _ = c.inbound.send(MockInbound::Text(text.into()));
        }
    }

    /// Simulate the server closing connection `index`.
    pub fn push_close(&self, index: usize) {
        if let Some(c) = self.shared.connections.lock().get(index) {
            c.closed.store(true, Ordering::SeqCst);
            let _ = c.inbound.send(MockInbound::Close);
        }
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, WsResult<Transport>> {
        Box::pin(async move {
            let failing = self.shared.failing_connects.load(Ordering::SeqCst);
            if failing > 0 {
                self.shared
                    .failing_connects
                    .store(failing - 1, Ordering::SeqCst);
                return Err(WsError::ConnectionFailed(format!("mock refused {url}")));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let conn = MockConnection {
                sent: Arc::new(Mutex::new(Vec::new())),
                pings: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
                inbound: tx,
            };
            let sink = MockSink {
                sent: conn.sent.clone(),
                pings: conn.pings.clone(),
                closed: conn.closed.clone(),
                shared: self.shared.clone(),
            };
            let stream = MockStream { inbound: rx };
            self.shared.connections.lock().push(conn);

            Ok(Transport {
                sink: Box::new(sink),
                stream: Box::new(stream),
            })
        })
    }
}

struct MockSink {
    sent: Arc<Mutex<Vec<String>>>,
    pings: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    shared: Arc<MockShared>,
}

impl MockSink {
    fn check(&self) -> WsResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WsError::ConnectionClosed {
                code: 1006,
                reason: "mock connection closed".into(),
            });
        }
        match self.shared.send_failures.lock().pop_front() {
            None => Ok(()),
            Some(MockSendFailure::Closed) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(WsError::ConnectionClosed {
                    code: 1006,
                    reason: "mock injected close".into(),
                })
            }
            Some(MockSendFailure::Other) => {
                Err(WsError::SendFailed("mock injected failure".into()))
            }
        }
    }
}

impl FrameSink for MockSink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, WsResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.sent.lock().push(text);
            Ok(())
        })
    }

    fn ping(&mut self) -> BoxFuture<'_, WsResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, WsResult<()>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<MockInbound>,
}

impl FrameStream for MockStream {
    fn next_frame(&mut self) -> BoxFuture<'_, Option<WsResult<String>>> {
        Box::pin(async move {
            match self.inbound.recv().await? {
                MockInbound::Text(text) => Some(Ok(text)),
                MockInbound::Close => Some(Err(WsError::ConnectionClosed {
                    code: 1000,
                    reason: "mock server close".into(),
                })),
            }
        })
    }
}
