//! Frame handler wiring channel payloads to the grid engine and snapshots.

use aevo_core::GridParams;
use aevo_executor::{GridEngine, GridError};
use aevo_persistence::SnapshotStore;
use aevo_telemetry::metrics::{
    REPLACEMENT_DROPPED, REPLACEMENT_INVALID_FILL, REPLACEMENT_SIGNING_FAILED,
    REPLACEMENT_SUBMITTED,
};
use aevo_telemetry::{order_failure_message, Metrics, Notifier};
use aevo_ws::{BoxFuture, FrameHandler, WsError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes `fills`, `orders` and `ticker:*` payloads.
pub struct GridHandler {
    engine: Arc<GridEngine>,
    params: GridParams,
    snapshots: Arc<SnapshotStore>,
    notifier: Notifier,
    instrument_name: String,
}

impl GridHandler {
    pub fn new(
        engine: Arc<GridEngine>,
        params: GridParams,
        snapshots: Arc<SnapshotStore>,
        notifier: Notifier,
        instrument_name: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            params,
            snapshots,
            notifier,
            instrument_name: instrument_name.into(),
        }
    }

    async fn handle_fill(&self, data: Value) {
        match self.engine.on_fill(&data, &self.params).await {
            Ok(reaction) => {
                Metrics::fill(&reaction.fill.side.to_string());
                Metrics::replacement(REPLACEMENT_SUBMITTED);
            }
            Err(GridError::InvalidFill(_)) => {
                Metrics::replacement(REPLACEMENT_INVALID_FILL);
            }
            Err(e @ GridError::Signing(_)) => {
                Metrics::replacement(REPLACEMENT_SIGNING_FAILED);
                self.alert(format!("Grid replacement could not be signed: {e}"));
            }
            Err(GridError::SubmissionDropped { order_id }) => {
                Metrics::replacement(REPLACEMENT_DROPPED);
                let message = match aevo_core::Fill::from_data(&data) {
                    Ok(fill) => order_failure_message(
                        &self.instrument_name,
                        !fill.is_buy(),
                        &self.params.opposite_price(fill.price, fill.is_buy()).to_string(),
                        &fill.filled.to_string(),
                        &format!("replacement {order_id} not delivered"),
                    ),
                    Err(_) => format!("Replacement {order_id} not delivered"),
                };
                self.alert(message);
            }
        }
    }

    /// Fire-and-forget alert; never blocks the dispatch loop.
    fn alert(&self, message: String) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move { notifier.notify(&message).await });
    }
}

/// Mark price from a ticker payload (`tickers[0].mark.price`, or a flat
/// `mark_price` field).
pub fn ticker_mark_price(data: &Value) -> Option<Decimal> {
    let raw = data
        .get("tickers")
        .and_then(|t| t.get(0))
        .and_then(|t| t.get("mark"))
        .and_then(|m| m.get("price"))
        .or_else(|| data.get("mark_price"))?;
    match raw {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

impl FrameHandler for GridHandler {
    fn on_ticker(&self, asset: String, data: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mark) = ticker_mark_price(&data).and_then(|d| d.to_f64()) {
                Metrics::mark_price(&asset, mark);
            }
            if let Err(e) = self.snapshots.record_ticker(&asset, data) {
                warn!(error = %e, %asset, "Failed to write ticker snapshot");
            }
        })
    }

    fn on_orders(&self, data: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let orders = data
                .get("orders")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for order in &orders {
                debug!(%order, "Order update");
            }
            if let Err(e) = self.snapshots.record_orders(&orders) {
                warn!(error = %e, "Failed to write order snapshot");
            }
        })
    }

    fn on_fills(&self, data: Value) -> BoxFuture<'_, ()> {
        Box::pin(self.handle_fill(data))
    }

    fn on_decode_error(&self, _error: &WsError) {
        Metrics::decode_error();
    }

    fn on_frame(&self, kind: &'static str) {
        Metrics::frame(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aevo_core::{Network, Price};
    use aevo_executor::{KeyManager, MockOrderSender, OrderScale, OrderSigner};
    use aevo_ws::SendOutcome;
    use alloy::primitives::address;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tempfile::TempDir;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    struct Fixture {
        handler: GridHandler,
        sender: Arc<MockOrderSender>,
        snapshots: Arc<SnapshotStore>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let keys = Arc::new(KeyManager::from_hex(TEST_KEY).unwrap());
        let maker = address!("1111111111111111111111111111111111111111");
        let signer = Arc::new(OrderSigner::new(keys, maker, Network::Testnet).unwrap());
        let sender = Arc::new(MockOrderSender::new());
        let engine = Arc::new(GridEngine::new(signer, sender.clone(), OrderScale::default()));
        let dir = TempDir::new().unwrap();
        let snapshots = Arc::new(SnapshotStore::new(dir.path()));
        let params = GridParams::new(Price::new(dec!(5)), 2).unwrap();
        let handler = GridHandler::new(
            engine,
            params,
            snapshots.clone(),
            Notifier::new(None).unwrap(),
            "ETH-PERP",
        );
        Fixture {
            handler,
            sender,
            snapshots,
            _dir: dir,
        }
    }

    fn fill_data(side: &str) -> Value {
        json!({"fill": {
            "order_id": "0xabc", "price": "3200.00", "filled": "0.5",
            "side": side, "instrument_id": "1"
        }})
    }

    #[tokio::test]
    async fn test_fill_places_one_opposite_order() {
        let f = fixture();
        f.handler.on_fills(fill_data("buy")).await;

        let sent = f.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["op"], "create_order");
        assert_eq!(sent[0]["data"]["is_buy"], false);
        assert_eq!(sent[0]["data"]["post_only"], true);
    }

    #[tokio::test]
    async fn test_invalid_fill_sends_nothing() {
        let f = fixture();
        f.handler.on_fills(json!({"fill": {"price": "3200"}})).await;
        f.handler.on_fills(json!("garbage")).await;
        assert_eq!(f.sender.send_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_replacement_does_not_stop_next_fill() {
        let f = fixture();
        f.sender.set_outcome(SendOutcome::Dropped);
        f.handler.on_fills(fill_data("sell")).await;

        f.sender.set_outcome(SendOutcome::Sent);
        f.handler.on_fills(fill_data("sell")).await;
        assert_eq!(f.sender.send_count(), 2);
    }

    #[tokio::test]
    async fn test_orders_and_tickers_are_snapshotted() {
        let f = fixture();
        f.handler
            .on_orders(json!({"orders": [{"order_id": "0x1"}, {"order_id": "0x2"}]}))
            .await;
        f.handler
            .on_ticker(
                "ETH-PERP".into(),
                json!({"tickers": [{"instrument_name": "ETH-PERP", "mark": {"price": "3201.5"}}]}),
            )
            .await;

        assert_eq!(f.snapshots.orders().len(), 2);
        assert_eq!(f.snapshots.tickers("ETH-PERP").len(), 1);
    }

    #[test]
    fn test_ticker_mark_price() {
        let nested = json!({"tickers": [{"mark": {"price": "3201.5"}}]});
        assert_eq!(ticker_mark_price(&nested), Some(dec!(3201.5)));
        assert_eq!(
            ticker_mark_price(&json!({"mark_price": 3200})),
            Some(dec!(3200))
        );
        assert_eq!(ticker_mark_price(&json!({"tickers": []})), None);
    }
}
