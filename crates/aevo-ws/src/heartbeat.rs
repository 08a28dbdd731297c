//! Connection liveness bookkeeping.
//!
//! Records when pings were written and when the last inbound frame arrived,
//! so the application can report how quiet a connection has been.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub struct HeartbeatMonitor {
    /// Last ping written.
    last_ping: RwLock<Option<DateTime<Utc>>>,
    /// Last inbound text frame.
    last_message: RwLock<DateTime<Utc>>,
    pings_sent: AtomicU64,
    ping_failures: AtomicU64,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self {
            last_ping: RwLock::new(None),
            last_message: RwLock::new(Utc::now()),
            pings_sent: AtomicU64::new(0),
            ping_failures: AtomicU64::new(0),
        }
    }

    /// Reset on a fresh connection.
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_message.write() = Utc::now();
    }

    pub fn record_ping(&self) {
        let now = Utc::now();
        *self.last_ping.write() = Some(now);
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        debug!(time = %now, "Heartbeat ping sent");
    }

    pub fn record_ping_failure(&self) {
        self.ping_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        *self.last_message.write() = Utc::now();
    }

    pub fn time_since_last_message_ms(&self) -> i64 {
        (Utc::now() - *self.last_message.read()).num_milliseconds()
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            last_ping: *self.last_ping.read(),
            last_message: *self.last_message.read(),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            ping_failures: self.ping_failures.load(Ordering::Relaxed),
            time_since_last_message_ms: self.time_since_last_message_ms(),
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_message: DateTime<Utc>,
    pub pings_sent: u64,
    pub ping_failures: u64,
    pub time_since_last_message_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_initial_state() {
        let hb = HeartbeatMonitor::new();
        let stats = hb.stats();
        assert!(stats.last_ping.is_none());
        assert_eq!(stats.pings_sent, 0);
    }

    #[test]
    fn test_heartbeat_records() {
        let hb = HeartbeatMonitor::new();
        hb.record_ping();
        hb.record_ping_failure();
        hb.record_message();

        let stats = hb.stats();
        assert!(stats.last_ping.is_some());
        assert_eq!(stats.pings_sent, 1);
        assert_eq!(stats.ping_failures, 1);
        assert!(stats.time_since_last_message_ms >= 0);

        hb.reset();
        assert!(hb.stats().last_ping.is_none());
        assert_eq!(hb.stats().pings_sent, 1);
    }
}
