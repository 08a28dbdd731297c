//! Subscription bookkeeping.
//!
//! [`SubscriptionRegistry`] remembers every channel subscribed during the
//! process lifetime so the connection layer can replay them after a
//! reconnect. [`AckTracker`] correlates subscribe requests with the
//! exchange's `{id, data: {success}}` acknowledgements by request id.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Append-only, ordered list of subscribed channels.
///
/// Duplicates are kept: the exchange tolerates repeated subscribes and
/// replay must mirror what the caller asked for.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: RwLock<Vec<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, channel: impl Into<String>) {
        let channel = channel.into();
        debug!(%channel, "Registered subscription");
        self.channels.write().push(channel);
    }

    /// Snapshot in registration order.
    pub fn all(&self) -> Vec<String> {
        self.channels.read().clone()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

/// Final status of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// `success: true` received.
    Confirmed,
    /// `success: false` or an error frame received.
    Rejected,
    /// No acknowledgement within the wait bound.
    TimedOut,
    /// The request was pruned or superseded before an answer arrived.
    Expired,
}

struct PendingEntry {
    channel: String,
    sent_at: Instant,
    waiter: Option<oneshot::Sender<bool>>,
}

/// Outstanding subscribe requests keyed by request id.
#[derive(Default)]
pub struct AckTracker {
    pending: Mutex<HashMap<u64, PendingEntry>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request and hand back a waitable handle.
    pub fn register(&self, id: u64, channel: &str) -> PendingAck {
        let (tx, rx) = oneshot::channel();
        self.insert(id, channel, Some(tx));
        PendingAck {
            id,
            channel: channel.to_string(),
            rx,
        }
    }

    /// Track a request nobody waits on (replayed subscriptions).
    pub fn track(&self, id: u64, channel: &str) {
        self.insert(id, channel, None);
    }

    fn insert(&self, id: u64, channel: &str, waiter: Option<oneshot::Sender<bool>>) {
        self.pending.lock().insert(
            id,
            PendingEntry {
                channel: channel.to_string(),
                sent_at: Instant::now(),
                waiter,
            },
        );
    }

    /// Resolve an acknowledgement. Returns the channel if the id was known.
    pub fn resolve(&self, id: u64, success: bool) -> Option<String> {
        let entry = self.pending.lock().remove(&id)?;
        if success {
            debug!(id, channel = %entry.channel, "Subscription confirmed");
        } else {
            warn!(id, channel = %entry.channel, "Subscription rejected");
        }
        if let Some(waiter) = entry.waiter {
            let _ = waiter.send(success);
        }
        Some(entry.channel)
    }

    /// Forget a request without resolving it.
    pub fn cancel(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    /// Drop requests older than `max_age`; returns their channels.
    pub fn expire(&self, max_age: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let stale: Vec<u64> = pending
            .iter()
            .filter(|(_, e)| now.duration_since(e.sent_at) >= max_age)
            .map(|(id, _)| *id)
            .collect();
        let mut channels = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(entry) = pending.remove(&id) {
                warn!(id, channel = %entry.channel, "Subscription acknowledgement never arrived");
                channels.push(entry.channel);
            }
        }
        channels
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Handle to an outstanding subscribe request.
#[derive(Debug)]
pub struct PendingAck {
    pub id: u64,
    pub channel: String,
    rx: oneshot::Receiver<bool>,
}

impl PendingAck {
    /// Wait at most `timeout` for the acknowledgement.
    pub async fn wait(self, timeout: Duration) -> AckStatus {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(true)) => AckStatus::Confirmed,
            Ok(Ok(false)) => AckStatus::Rejected,
            Ok(Err(_)) => AckStatus::Expired,
            Err(_) => AckStatus::TimedOut,
        }
    }
}
