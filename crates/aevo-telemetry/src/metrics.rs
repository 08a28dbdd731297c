//! Prometheus metrics for the Aevo grid client.
//!
//! Covers:
//! - Connection state, reconnects and subscriptions
//! - Inbound frames by kind and decode errors
//! - Fills and grid replacement outcomes
//! - Mark price per asset and webhook notifications
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A failure means a
//! duplicate metric name, which should crash at startup. These panics only
//! occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use serde::Serialize;

/// Connection state code (0 disconnected .. 3 open, 4 closing).
pub static WS_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "aevo_ws_state",
        "WebSocket connection state (0=disconnected,1=connecting,2=authenticating,3=open,4=closing)"
    )
    .unwrap()
});

/// Cumulative reconnect attempts by reason.
pub static WS_RECONNECTS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "aevo_ws_reconnects",
        "Cumulative WebSocket reconnect attempts",
        &["reason"]
    )
    .unwrap()
});

/// Registered subscriptions.
pub static WS_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("aevo_ws_subscriptions", "Registered channel subscriptions").unwrap()
});

/// Inbound frames by kind.
pub static FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "aevo_frames_total",
        "Inbound WebSocket frames by kind",
        &["kind"]
    )
    .unwrap()
});

/// Frames that could not be decoded.
pub static DECODE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "aevo_decode_errors_total",
        "Inbound frames that failed to decode"
    )
    .unwrap()
});

/// Fills received by side.
pub static FILLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("aevo_fills_total", "Fills received", &["side"]).unwrap()
});

/// Grid replacement outcomes.
pub static REPLACEMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "aevo_grid_replacements_total",
        "Grid replacement orders by result",
        &["result"]
    )
    .unwrap()
});

/// Latest mark price per asset.
pub static MARK_PRICE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("aevo_mark_price", "Latest mark price", &["asset"]).unwrap()
});

/// Webhook notifications by result.
pub static NOTIFICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "aevo_notifications_total",
        "Webhook notifications by result",
        &["result"]
    )
    .unwrap()
});

const FRAME_KINDS: [&str; 5] = ["ack", "ticker", "orders", "fills", "other"];

/// Replacement result labels.
pub const REPLACEMENT_SUBMITTED: &str = "submitted";
pub const REPLACEMENT_DROPPED: &str = "dropped";
pub const REPLACEMENT_INVALID_FILL: &str = "invalid_fill";
pub const REPLACEMENT_SIGNING_FAILED: &str = "signing_failed";

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn ws_state(code: i64) {
        WS_STATE.set(code);
    }

    /// Set the cumulative reconnect count for `reason`.
    pub fn ws_reconnects(reason: &str, total: u64) {
        WS_RECONNECTS
            .with_label_values(&[reason])
            .set(i64::try_from(total).unwrap_or(i64::MAX));
    }

    pub fn ws_subscriptions(count: usize) {
        WS_SUBSCRIPTIONS.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn frame(kind: &str) {
        FRAMES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn decode_error() {
        DECODE_ERRORS_TOTAL.inc();
    }

    pub fn fill(side: &str) {
        FILLS_TOTAL.with_label_values(&[side]).inc();
    }

    pub fn replacement(result: &str) {
        REPLACEMENTS_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn mark_price(asset: &str, price: f64) {
        MARK_PRICE.with_label_values(&[asset]).set(price);
    }

    pub fn notification(success: bool) {
        let result = if success { "sent" } else { "failed" };
        NOTIFICATIONS_TOTAL.with_label_values(&[result]).inc();
    }

    /// Totals for the periodic status log line.
    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            ws_state: WS_STATE.get(),
            frames: FRAME_KINDS
                .iter()
                .map(|k| FRAMES_TOTAL.with_label_values(&[*k]).get())
                .sum(),
            decode_errors: DECODE_ERRORS_TOTAL.get(),
            fills: ["buy", "sell"]
                .iter()
                .map(|s| FILLS_TOTAL.with_label_values(&[*s]).get())
                .sum(),
            replacements_submitted: REPLACEMENTS_TOTAL
                .with_label_values(&[REPLACEMENT_SUBMITTED])
                .get(),
            replacements_failed: [
                REPLACEMENT_DROPPED,
                REPLACEMENT_INVALID_FILL,
                REPLACEMENT_SIGNING_FAILED,
            ]
            .iter()
            .map(|r| REPLACEMENTS_TOTAL.with_label_values(&[*r]).get())
            .sum(),
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn gather_text() -> String {
        use prometheus::Encoder;
        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ws_state: i64,
    pub frames: u64,
    pub decode_errors: u64,
    pub fills: u64,
    pub replacements_submitted: u64,
    pub replacements_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_feed_snapshot() {
        let before = Metrics::snapshot();
        Metrics::frame("fills");
        Metrics::decode_error();
        Metrics::fill("buy");
        Metrics::replacement(REPLACEMENT_SUBMITTED);
        Metrics::replacement(REPLACEMENT_DROPPED);
        let after = Metrics::snapshot();

        assert!(after.frames > before.frames);
        assert!(after.decode_errors > before.decode_errors);
        assert!(after.fills > before.fills);
        assert!(after.replacements_submitted > before.replacements_submitted);
        assert!(after.replacements_failed > before.replacements_failed);
    }

    #[test]
    fn test_gather_text_contains_metrics() {
        Metrics::ws_state(3);
        Metrics::ws_reconnects("read_failed", 2);
        Metrics::mark_price("ETH", 3200.5);
        let text = Metrics::gather_text();
        assert!(text.contains("aevo_ws_state"));
        assert!(text.contains("aevo_ws_reconnects"));
        assert!(text.contains("aevo_mark_price"));
    }
}
