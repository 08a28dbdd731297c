//! WebSocket connection manager.
//!
//! Owns the single live connection to the exchange: opening and
//! authenticating it, serializing writes, bounded reads, reconnecting after
//! failures and replaying every registered subscription on the new
//! connection.
//!
//! Reconnects are serialized by a mutex and tagged with a connection epoch.
//! A caller that observed a failure on epoch `n` only reconnects if the epoch
//! is still `n` once it holds the lock; otherwise someone else already did.

use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatStats};
use crate::message::{auth_frame, subscribe_frame, AuthCredentials};
use crate::subscription::{AckTracker, PendingAck, SubscriptionRegistry};
use crate::transport::{Connector, FrameSink, FrameStream, Transport};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Session credentials; `None` skips the auth handshake.
    pub credentials: Option<AuthCredentials>,
    /// Pause after the auth frame before the session counts as open.
    pub auth_settle_delay_ms: u64,
    /// Pause after a failed open before returning the error.
    pub open_retry_cooldown_ms: u64,
    /// Pause between closing the old connection and opening a new one.
    pub reconnect_delay_ms: u64,
    /// Ping cadence.
    pub heartbeat_interval_ms: u64,
    /// Bound on a single frame wait.
    pub recv_timeout_ms: u64,
    /// Subscription acknowledgements older than this are pruned.
    pub ack_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            credentials: None,
            auth_settle_delay_ms: 1_000,
            open_retry_cooldown_ms: 10_000,
            reconnect_delay_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            recv_timeout_ms: 20_000,
            ack_timeout_ms: 10_000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Open,
    Closing,
}

impl ConnectionState {
    /// Numeric encoding for gauges.
    pub fn as_gauge(&self) -> i64 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Authenticating => 2,
            Self::Open => 3,
            Self::Closing => 4,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Outcome of [`ConnectionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written on the first attempt.
    Sent,
    /// Written once after a reconnect.
    SentAfterRetry,
    /// Not delivered.
    Dropped,
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

/// Why a reconnect was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconnectReason {
    /// The read side reported a close or error.
    ReadFailed,
    /// A write failed.
    SendFailed,
    /// A heartbeat ping failed.
    PingFailed,
    /// Explicit request.
    Requested,
}

impl ReconnectReason {
    pub const ALL: [Self; 4] = [
        Self::ReadFailed,
        Self::SendFailed,
        Self::PingFailed,
        Self::Requested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadFailed => "read_failed",
            Self::SendFailed => "send_failed",
            Self::PingFailed => "ping_failed",
            Self::Requested => "requested",
        }
    }
}

/// Result of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Text(String),
    /// Nothing arrived within `recv_timeout`.
    Timeout,
    /// The connection of `epoch` failed or was never established.
    Closed { epoch: u64, reason: String },
    /// A reconnect swapped the connection while waiting.
    Replaced,
    Shutdown,
}

/// Point-in-time view for logs and gauges.
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub epoch: u64,
    pub reconnects: u64,
    pub reconnects_by_reason: Vec<(ReconnectReason, u64)>,
    pub subscriptions: usize,
    pub pending_acks: usize,
    pub heartbeat: HeartbeatStats,
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    state: RwLock<ConnectionState>,
    writer: TokioMutex<Option<Box<dyn FrameSink>>>,
    reader: TokioMutex<Option<Box<dyn FrameStream>>>,
    reconnect_lock: TokioMutex<()>,
    epoch: watch::Sender<u64>,
    registry: SubscriptionRegistry,
    acks: AckTracker,
    heartbeat: HeartbeatMonitor,
    next_request_id: AtomicU64,
    reconnects: AtomicU64,
    reconnects_by_reason: Mutex<HashMap<ReconnectReason, u64>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (epoch, _) = watch::channel(0u64);
        Self {
            config,
            connector,
            state: RwLock::new(ConnectionState::Disconnected),
            writer: TokioMutex::new(None),
            reader: TokioMutex::new(None),
            reconnect_lock: TokioMutex::new(()),
            epoch,
            registry: SubscriptionRegistry::new(),
            acks: AckTracker::new(),
            heartbeat: HeartbeatMonitor::new(),
            // id 1 is conventionally the first auth request
            next_request_id: AtomicU64::new(1),
            reconnects: AtomicU64::new(0),
            reconnects_by_reason: Mutex::new(HashMap::new()),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), state);
        if prev != state {
            debug!(from = %prev, to = %state, "Connection state changed");
        }
    }

    /// Current connection epoch.
    pub fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    fn bump_epoch(&self) -> u64 {
        let mut next = 0;
        self.epoch.send_modify(|e| {
            *e += 1;
            next = *e;
        });
        next
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn acks(&self) -> &AckTracker {
        &self.acks
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state(),
            epoch: self.epoch(),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            reconnects_by_reason: {
                let by_reason = self.reconnects_by_reason.lock();
                ReconnectReason::ALL
                    .iter()
                    .map(|r| (*r, by_reason.get(r).copied().unwrap_or(0)))
                    .collect()
            },
            subscriptions: self.registry.len(),
            pending_acks: self.acks.len(),
            heartbeat: self.heartbeat.stats(),
        }
    }

    /// Signal graceful shutdown.
    ///
    /// Cancels every pending delay and loop, then closes the transport.
    pub async fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
        if let Err(e) = self.close().await {
            warn!(error = %e, "Error closing connection during shutdown");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// Sleep for `ms`, returning `false` if shutdown interrupted it.
    async fn pause(&self, ms: u64) -> bool {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(ms)) => true,
            () = self.shutdown_token.cancelled() => false,
        }
    }

    /// Open until it succeeds, then replay subscriptions.
    ///
    /// Start-up path; every failed attempt already waited the open cooldown.
    pub async fn connect(&self) -> WsResult<()> {
        let mut attempt = 0u32;
        loop {
            if self.is_shutdown() {
                return Err(WsError::Shutdown);
            }
            attempt += 1;
            match self.open().await {
                Ok(()) => break,
                Err(WsError::Shutdown) => return Err(WsError::Shutdown),
                Err(e) => warn!(attempt, error = %e, "Initial connection attempt failed"),
            }
        }
        self.replay_subscriptions().await?;
        Ok(())
    }

    /// Open a new connection, replacing any existing one.
    ///
    /// On failure the state is `Disconnected` and the call returns only after
    /// `open_retry_cooldown_ms` (or shutdown).
    pub async fn open(&self) -> WsResult<()> {
        if self.is_shutdown() {
            return Err(WsError::Shutdown);
        }
        self.teardown().await;
        self.set_state(ConnectionState::Connecting);
        info!(url = %self.config.url, "Connecting to WebSocket");

        match self.establish().await {
            Ok(transport) => {
                *self.writer.lock().await = Some(transport.sink);
                *self.reader.lock().await = Some(transport.stream);
                self.set_state(ConnectionState::Open);
                self.heartbeat.reset();
                let epoch = self.bump_epoch();
                info!(epoch, "WebSocket connection open");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                error!(error = %e, "Failed to open WebSocket connection");
                if !self.pause(self.config.open_retry_cooldown_ms).await {
                    return Err(WsError::Shutdown);
                }
                Err(e)
            }
        }
    }

    async fn establish(&self) -> WsResult<Transport> {
        let mut transport = self.connector.connect(&self.config.url).await?;

        if let Some(credentials) = &self.config.credentials {
            self.set_state(ConnectionState::Authenticating);
            let id = self.next_request_id();
            transport
                .sink
                .send_text(auth_frame(id, credentials).to_string())
                .await?;
            debug!(id, "Auth frame sent");
            if !self.pause(self.config.auth_settle_delay_ms).await {
                let _ = transport.sink.close().await;
                return Err(WsError::Shutdown);
            }
        }

        Ok(transport)
    }

    /// Close the live connection, if any.
    pub async fn close(&self) -> WsResult<()> {
        if self.writer.lock().await.is_none() && self.reader.lock().await.is_none() {
            debug!("Close requested without a live connection");
            return Ok(());
        }
        self.teardown().await;
        Ok(())
    }

    async fn teardown(&self) {
        let had_connection = self.state() != ConnectionState::Disconnected;
        if had_connection {
            self.set_state(ConnectionState::Closing);
        }
        // Wake any reader parked on the old stream before taking its lock.
        self.bump_epoch();
        self.reader.lock().await.take();
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error closing old connection");
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Reconnect unconditionally (unless one is already under way).
    pub async fn reconnect(&self) -> WsResult<()> {
        self.reconnect_from(self.epoch(), ReconnectReason::Requested)
            .await
    }

    /// Reconnect on behalf of a failure observed on `observed_epoch`.
    ///
    /// Returns immediately if the connection was already replaced.
    pub async fn reconnect_from(
        &self,
        observed_epoch: u64,
        reason: ReconnectReason,
    ) -> WsResult<()> {
        let _guard = self.reconnect_lock.lock().await;
        if self.is_shutdown() {
            return Err(WsError::Shutdown);
        }
        let current = self.epoch();
        if current != observed_epoch {
            debug!(observed_epoch, current, "Connection already replaced, skipping reconnect");
            return Ok(());
        }

        warn!(epoch = current, reason = reason.as_str(), "Reconnecting WebSocket");
        *self.reconnects_by_reason.lock().entry(reason).or_insert(0) += 1;
        self.teardown().await;
        if !self.pause(self.config.reconnect_delay_ms).await {
            return Err(WsError::Shutdown);
        }
        self.open().await?;
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        self.replay_subscriptions().await?;
        Ok(())
    }

    /// Send one subscribe frame per registered channel, in order.
    async fn replay_subscriptions(&self) -> WsResult<usize> {
        let channels = self.registry.all();
        let mut guard = self.writer.lock().await;
        let sink = guard.as_mut().ok_or(WsError::NotConnected)?;
        for channel in &channels {
            let id = self.next_request_id();
            self.acks.track(id, channel);
            if let Err(e) = sink.send_text(subscribe_frame(id, channel).to_string()).await {
                self.acks.cancel(id);
                error!(%channel, error = %e, "Failed to replay subscription");
                return Err(e);
            }
            debug!(%channel, id, "Subscription replayed");
        }
        if !channels.is_empty() {
            info!(count = channels.len(), "Subscriptions replayed");
        }
        Ok(channels.len())
    }

    async fn write_text(&self, text: &str) -> WsResult<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send_text(text.to_string()).await,
            None => Err(WsError::NotConnected),
        }
    }

    /// Deliver one frame, reconnecting at most once.
    ///
    /// - no live connection: reconnect, then one attempt
    /// - closed connection: reconnect, then one retransmission
    /// - any other error: reconnect and drop the frame
    pub async fn send(&self, payload: &Value) -> SendOutcome {
        let text = payload.to_string();
        let epoch = self.epoch();

        let err = match self.write_text(&text).await {
            Ok(()) => return SendOutcome::Sent,
            Err(e) => e,
        };

        if !err.is_connection_closed() {
            error!(error = %err, "Send failed, dropping frame");
            if let Err(e) = self.reconnect_from(epoch, ReconnectReason::SendFailed).await {
                warn!(error = %e, "Reconnect after send failure failed");
            }
            return SendOutcome::Dropped;
        }

        warn!(error = %err, "Connection unavailable for send, reconnecting");
        if let Err(e) = self.reconnect_from(epoch, ReconnectReason::SendFailed).await {
            warn!(error = %e, "Reconnect failed, dropping frame");
            return SendOutcome::Dropped;
        }

        match self.write_text(&text).await {
            Ok(()) => {
                info!("Frame delivered after reconnect");
                SendOutcome::SentAfterRetry
            }
            Err(e) => {
                error!(error = %e, "Retransmission failed, dropping frame");
                SendOutcome::Dropped
            }
        }
    }

    /// Register a channel and send its subscribe request.
    ///
    /// The channel stays registered even if this send is dropped; it is
    /// replayed on the next reconnect.
    pub async fn subscribe(&self, channel: &str) -> WsResult<PendingAck> {
        self.registry.add(channel);
        let id = self.next_request_id();
        let pending = self.acks.register(id, channel);
        match self.send(&subscribe_frame(id, channel)).await {
            SendOutcome::Dropped => {
                self.acks.cancel(id);
                Err(WsError::SubscriptionError(format!(
                    "subscribe request for {channel} was not delivered"
                )))
            }
            outcome => {
                info!(%channel, id, ?outcome, "Subscribe request sent");
                Ok(pending)
            }
        }
    }

    /// Route an acknowledgement to its waiter.
    pub fn resolve_ack(&self, id: u64, success: bool) -> Option<String> {
        self.acks.resolve(id, success)
    }

    /// One bounded read from the live connection.
    pub async fn recv(&self) -> Received {
        if self.is_shutdown() {
            return Received::Shutdown;
        }
        let mut epoch_rx = self.epoch.subscribe();
        let epoch = *epoch_rx.borrow_and_update();
        let timeout = Duration::from_millis(self.config.recv_timeout_ms);

        let mut guard = self.reader.lock().await;
        if *epoch_rx.borrow() != epoch {
            return Received::Replaced;
        }

        if guard.is_none() || self.state() != ConnectionState::Open {
            drop(guard);
            // Not connected: wait for a new connection, but not forever
            // in case nobody else is reconnecting.
            return tokio::select! {
                () = self.shutdown_token.cancelled() => Received::Shutdown,
                _ = epoch_rx.changed() => Received::Replaced,
                () = tokio::time::sleep(timeout) => Received::Closed {
                    epoch,
                    reason: "not connected".to_string(),
                },
            };
        }
        let Some(stream) = guard.as_mut() else {
            return Received::Replaced;
        };

        tokio::select! {
            biased;
            () = self.shutdown_token.cancelled() => Received::Shutdown,
            _ = epoch_rx.changed() => Received::Replaced,
            frame = tokio::time::timeout(timeout, stream.next_frame()) => match frame {
                Err(_) => Received::Timeout,
                Ok(Some(Ok(text))) => {
                    self.heartbeat.record_message();
                    Received::Text(text)
                }
                Ok(Some(Err(e))) => {
                    warn!(epoch, error = %e, "WebSocket read failed");
                    Received::Closed { epoch, reason: e.to_string() }
                }
                Ok(None) => {
                    warn!(epoch, "WebSocket stream ended");
                    Received::Closed { epoch, reason: "stream ended".to_string() }
                }
            },
        }
    }

    /// Ping every `heartbeat_interval_ms`; reconnect when a ping fails.
    ///
    /// Also prunes subscription acknowledgements that never arrived. Returns
    /// on shutdown.
    pub async fn run_heartbeat(&self) {
        let ack_timeout = Duration::from_millis(self.config.ack_timeout_ms);
        loop {
            if !self.pause(self.config.heartbeat_interval_ms).await {
                debug!("Heartbeat loop stopped");
                return;
            }

            self.acks.expire(ack_timeout);

            let epoch = self.epoch();
            let result = {
                let mut guard = self.writer.lock().await;
                match guard.as_mut() {
                    Some(sink) => sink.ping().await,
                    None => Err(WsError::NotConnected),
                }
            };

            match result {
                Ok(()) => self.heartbeat.record_ping(),
                Err(e) => {
                    self.heartbeat.record_ping_failure();
                    warn!(error = %e, "Heartbeat ping failed, reconnecting");
                    match self.reconnect_from(epoch, ReconnectReason::PingFailed).await {
                        Ok(()) => {}
                        Err(WsError::Shutdown) => return,
                        Err(e) => error!(error = %e, "Reconnect from heartbeat failed"),
                    }
                }
            }
        }
    }
}
