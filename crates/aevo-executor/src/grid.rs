//! Fill-driven grid replacement.
//!
//! Every valid fill produces exactly one post-only order on the opposite
//! side, one grid interval away, for the filled quantity. Submission failures
//! are reported and never retried here; the connection layer already made
//! its single retransmission attempt.
//!
//! The engine also remembers the ids of orders this session placed so they
//! can be cancelled on shutdown.

use crate::command::{self, OrderFlags};
use crate::error::{GridError, GridResult};
use crate::order_sender::OrderSender;
use crate::signer::{OrderRequest, OrderScale, OrderSigner};
use aevo_core::{Fill, GridParams, OrderSide, Price, Size};
use aevo_ws::SendOutcome;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Default number of replacements remembered for reconciliation.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// Maximum number of order ids tracked for session cancellation.
pub const DEFAULT_TRACKED_ORDERS: usize = 1024;

/// A replacement order placed in reaction to a fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replacement {
    pub order_id: String,
    pub filled_order_id: String,
    pub side: OrderSide,
    pub price: Price,
    pub quantity: Size,
    pub placed_at: DateTime<Utc>,
}

/// Result of a successful reaction.
#[derive(Debug, Clone)]
pub struct GridReaction {
    pub fill: Fill,
    pub replacement: Replacement,
    pub outcome: SendOutcome,
}

pub struct GridEngine {
    signer: Arc<OrderSigner>,
    sender: Arc<dyn OrderSender>,
    scale: OrderScale,
    history: Mutex<VecDeque<Replacement>>,
    history_capacity: usize,
    tracked: Mutex<VecDeque<String>>,
}

impl GridEngine {
    pub fn new(signer: Arc<OrderSigner>, sender: Arc<dyn OrderSender>, scale: OrderScale) -> Self {
        Self::with_history_capacity(signer, sender, scale, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(
        signer: Arc<OrderSigner>,
        sender: Arc<dyn OrderSender>,
        scale: OrderScale,
        history_capacity: usize,
    ) -> Self {
        Self {
            signer,
            sender,
            scale,
            history: Mutex::new(VecDeque::with_capacity(history_capacity.min(1024))),
            history_capacity: history_capacity.max(1),
            tracked: Mutex::new(VecDeque::new()),
        }
    }

    /// React to the `data` object of a `fills` frame.
    pub async fn on_fill(&self, data: &Value, params: &GridParams) -> GridResult<GridReaction> {
        let fill = Fill::from_data(data).map_err(|e| {
            warn!(error = %e, %data, "Ignoring invalid fill");
            GridError::InvalidFill(e)
        })?;

        let side = fill.side.opposite();
        let price = params.opposite_price(fill.price, fill.is_buy());
        info!(
            filled_order_id = %fill.order_id,
            fill_side = %fill.side,
            fill_price = %fill.price,
            quantity = %fill.filled,
            instrument = %fill.instrument_id,
            new_side = %side,
            new_price = %price,
            "Fill received, placing grid replacement"
        );

        let request = OrderRequest::new(
            fill.instrument_id,
            side.is_buy(),
            price,
            fill.filled,
            self.scale,
        );
        let timestamp = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let signed = self.signer.sign(&request, timestamp).map_err(|e| {
            error!(error = %e, filled_order_id = %fill.order_id, "Failed to sign replacement");
            GridError::Signing(e)
        })?;

        let frame = command::create_order(&signed, OrderFlags::MAKER, None);
        let outcome = self.sender.send(frame).await;
        if outcome == SendOutcome::Dropped {
            error!(
                order_id = %signed.order_id,
                filled_order_id = %fill.order_id,
                "Replacement order dropped"
            );
            return Err(GridError::SubmissionDropped {
                order_id: signed.order_id,
            });
        }

        let replacement = Replacement {
            order_id: signed.order_id,
            filled_order_id: fill.order_id.clone(),
            side,
            price,
            quantity: fill.filled,
            placed_at: Utc::now(),
        };
        info!(order_id = %replacement.order_id, ?outcome, "Grid replacement submitted");
        self.track_order(&replacement.order_id);
        self.remember(replacement.clone());

        Ok(GridReaction {
            fill,
            replacement,
            outcome,
        })
    }

    fn remember(&self, replacement: Replacement) {
        let mut history = self.history.lock();
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(replacement);
    }

    /// Most recent replacements, oldest first.
    pub fn recent_replacements(&self) -> Vec<Replacement> {
        self.history.lock().iter().cloned().collect()
    }

    /// Remember an order placed by this session. Oldest ids are forgotten
    /// once [`DEFAULT_TRACKED_ORDERS`] is reached.
    pub fn track_order(&self, order_id: &str) {
        if order_id.is_empty() {
            return;
        }
        let mut tracked = self.tracked.lock();
        if tracked.iter().any(|id| id == order_id) {
            return;
        }
        if tracked.len() == DEFAULT_TRACKED_ORDERS {
            tracked.pop_front();
        }
        tracked.push_back(order_id.to_string());
    }

    /// Order ids placed by this session, oldest first.
    pub fn tracked_orders(&self) -> Vec<String> {
        self.tracked.lock().iter().cloned().collect()
    }

    /// Cancel one order over the WebSocket. Empty ids are ignored.
    pub async fn cancel_order(&self, order_id: &str) -> GridResult<()> {
        if order_id.is_empty() {
            return Ok(());
        }
        let outcome = self.sender.send(command::cancel_order(order_id)).await;
        if outcome == SendOutcome::Dropped {
            warn!(%order_id, "Cancel request dropped");
            return Err(GridError::CancelDropped {
                target: order_id.to_string(),
            });
        }
        self.tracked.lock().retain(|id| id != order_id);
        info!(%order_id, "Cancel requested");
        Ok(())
    }

    /// Cancel every open order of the account.
    pub async fn cancel_all(&self) -> GridResult<()> {
        let outcome = self.sender.send(command::cancel_all_orders()).await;
        if outcome == SendOutcome::Dropped {
            warn!("Cancel-all request dropped");
            return Err(GridError::CancelDropped {
                target: "all orders".to_string(),
            });
        }
        self.tracked.lock().clear();
        info!("Cancel of all open orders requested");
        Ok(())
    }

    /// Cancel every tracked order. Returns `(sent, dropped)`.
    pub async fn cancel_tracked(&self) -> (usize, usize) {
        let mut sent = 0;
        let mut dropped = 0;
        for order_id in self.tracked_orders() {
            match self.cancel_order(&order_id).await {
                Ok(()) => sent += 1,
                Err(_) => dropped += 1,
            }
        }
        (sent, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_sender::MockOrderSender;
    use crate::signer::KeyManager;
    use aevo_core::Network;
    use alloy::primitives::Address;
    use rust_decimal_macros::dec;
    use serde_json::json;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn engine(capacity: usize) -> (GridEngine, Arc<MockOrderSender>) {
        let keys = Arc::new(KeyManager::from_hex(TEST_KEY).unwrap());
        let signer = Arc::new(OrderSigner::new(keys, Address::ZERO, Network::Testnet).unwrap());
        let sender = Arc::new(MockOrderSender::new());
        let engine = GridEngine::with_history_capacity(
            signer,
            sender.clone(),
            OrderScale::default(),
            capacity,
        );
        (engine, sender)
    }

    fn params() -> GridParams {
        GridParams::new(Price::new(dec!(5)), 2).unwrap()
    }

    fn fill(order_id: &str, side: &str, price: &str) -> Value {
        json!({
            "fill": {
                "order_id": order_id,
                "price": price,
                "filled": "0.5",
                "side": side,
                "instrument_id": "1"
            }
        })
    }

    #[tokio::test]
    async fn test_buy_fill_places_one_sell_below() {
        let (engine, sender) = engine(8);
        let reaction = engine
            .on_fill(&fill("0xa", "buy", "3200.00"), &params())
            .await
            .unwrap();

        assert_eq!(reaction.replacement.side, OrderSide::Sell);
        assert_eq!(reaction.replacement.price, Price::new(dec!(3195.00)));
        assert_eq!(sender.send_count(), 1);

        let frame = &sender.sent()[0];
        assert_eq!(frame["op"], "create_order");
        assert_eq!(frame["data"]["is_buy"], false);
        assert_eq!(frame["data"]["post_only"], true);
        assert_eq!(frame["data"]["instrument"], 1);
        assert_eq!(frame["data"]["limit_price"], "3195000000");
        assert_eq!(frame["data"]["amount"], "500000");
    }

    #[tokio::test]
    async fn test_sell_fill_places_buy_above() {
        let (engine, sender) = engine(8);
        let reaction = engine
            .on_fill(&fill("0xb", "sell", "3200.00"), &params())
            .await
            .unwrap();
        assert_eq!(reaction.replacement.side, OrderSide::Buy);
        assert_eq!(reaction.replacement.price, Price::new(dec!(3205.00)));
        assert_eq!(sender.sent()[0]["data"]["is_buy"], true);
    }

    #[tokio::test]
    async fn test_invalid_fill_sends_nothing() {
        let (engine, sender) = engine(8);
        let missing = json!({"fill": {"order_id": "0xc", "price": "1"}});
        let garbage = fill("0xd", "buy", "not-a-number");

        assert!(matches!(
            engine.on_fill(&missing, &params()).await,
            Err(GridError::InvalidFill(_))
        ));
        assert!(matches!(
            engine.on_fill(&garbage, &params()).await,
            Err(GridError::InvalidFill(_))
        ));
        assert_eq!(sender.send_count(), 0);
        assert!(engine.recent_replacements().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_submission_is_reported_not_retried() {
        let (engine, sender) = engine(8);
        sender.set_outcome(SendOutcome::Dropped);
        let result = engine.on_fill(&fill("0xe", "buy", "100"), &params()).await;
        assert!(matches!(result, Err(GridError::SubmissionDropped { .. })));
        assert_eq!(sender.send_count(), 1);
        assert!(engine.recent_replacements().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let (engine, _sender) = engine(2);
        for id in ["0x1", "0x2", "0x3"] {
            engine.on_fill(&fill(id, "buy", "100"), &params()).await.unwrap();
        }
        let recent: Vec<String> = engine
            .recent_replacements()
            .into_iter()
            .map(|r| r.filled_order_id)
            .collect();
        assert_eq!(recent, vec!["0x2", "0x3"]);
    }

    #[tokio::test]
    async fn test_replacements_are_tracked() {
        let (engine, _sender) = engine(8);
        let reaction = engine
            .on_fill(&fill("0xf", "buy", "100"), &params())
            .await
            .unwrap();
        engine.track_order("0xladder");
        engine.track_order("0xladder");
        engine.track_order("");
        assert_eq!(
            engine.tracked_orders(),
            vec![reaction.replacement.order_id, "0xladder".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cancel_order_frame_and_untrack() {
        let (engine, sender) = engine(8);
        engine.track_order("0xaaa");
        engine.track_order("0xbbb");

        engine.cancel_order("0xaaa").await.unwrap();
        engine.cancel_order("").await.unwrap();

        assert_eq!(sender.send_count(), 1);
        assert_eq!(
            sender.sent()[0],
            json!({"op": "cancel_order", "data": {"order_id": "0xaaa"}})
        );
        assert_eq!(engine.tracked_orders(), vec!["0xbbb".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_cancel_keeps_tracking() {
        let (engine, sender) = engine(8);
        engine.track_order("0xaaa");
        sender.set_outcome(SendOutcome::Dropped);

        let result = engine.cancel_order("0xaaa").await;
        assert!(matches!(result, Err(GridError::CancelDropped { ref target }) if target == "0xaaa"));
        assert_eq!(engine.tracked_orders(), vec!["0xaaa".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_all_sends_single_frame() {
        let (engine, sender) = engine(8);
        engine.track_order("0xaaa");
        engine.track_order("0xbbb");

        engine.cancel_all().await.unwrap();

        assert_eq!(sender.send_count(), 1);
        assert_eq!(sender.sent()[0], json!({"op": "cancel_all_orders", "data": {}}));
        assert!(engine.tracked_orders().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_tracked_counts_outcomes() {
        let (engine, sender) = engine(8);
        for id in ["0x1", "0x2", "0x3"] {
            engine.track_order(id);
        }
        assert_eq!(engine.cancel_tracked().await, (3, 0));
        let ops: Vec<String> = sender
            .sent()
            .iter()
            .map(|f| f["data"]["order_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ops, vec!["0x1", "0x2", "0x3"]);
        assert!(engine.tracked_orders().is_empty());

        engine.track_order("0x4");
        sender.set_outcome(SendOutcome::Dropped);
        assert_eq!(engine.cancel_tracked().await, (0, 1));
    }
}
