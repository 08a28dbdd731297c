//! Order command frames.
//!
//! Integer fields (`amount`, `limit_price`, `salt`) travel as decimal
//! strings; `instrument` and `timestamp` as JSON numbers.

use crate::signer::SignedOrder;
use serde_json::{json, Map, Value};

/// Flags attached to a submitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderFlags {
    pub post_only: bool,
    pub mmp: bool,
}

impl OrderFlags {
    /// Resting maker order (grid orders).
    pub const MAKER: Self = Self {
        post_only: true,
        mmp: true,
    };

    /// May cross the book (flattening, stop-loss).
    pub const TAKER: Self = Self {
        post_only: false,
        mmp: false,
    };
}

fn order_data(order: &SignedOrder, flags: OrderFlags) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("instrument".into(), json!(order.instrument.value()));
    data.insert("maker".into(), json!(order.maker.to_checksum(None)));
    data.insert("is_buy".into(), json!(order.is_buy));
    data.insert("amount".into(), json!(order.amount.to_string()));
    data.insert("limit_price".into(), json!(order.limit_price.to_string()));
    data.insert("salt".into(), json!(order.salt.to_string()));
    data.insert("signature".into(), json!(order.signature));
    data.insert("post_only".into(), json!(flags.post_only));
    data.insert("mmp".into(), json!(flags.mmp));
    data.insert("timestamp".into(), json!(order.timestamp));
    data
}

fn with_id(mut frame: Map<String, Value>, id: Option<u64>) -> Value {
    if let Some(id) = id {
        frame.insert("id".into(), json!(id));
    }
    Value::Object(frame)
}

/// `create_order` frame.
pub fn create_order(order: &SignedOrder, flags: OrderFlags, id: Option<u64>) -> Value {
    let mut frame = Map::new();
    frame.insert("op".into(), json!("create_order"));
    frame.insert("data".into(), Value::Object(order_data(order, flags)));
    with_id(frame, id)
}

/// `cancel_order` frame for a single resting order.
pub fn cancel_order(order_id: &str) -> Value {
    json!({"op": "cancel_order", "data": {"order_id": order_id}})
}

/// `cancel_all_orders` frame; the exchange cancels every open order of the account.
pub fn cancel_all_orders() -> Value {
    json!({"op": "cancel_all_orders", "data": {}})
}

/// Body of a REST `POST /orders`.
pub fn rest_order_body(order: &SignedOrder, post_only: bool, reduce_only: bool) -> Value {
    json!({
        "maker": order.maker.to_checksum(None),
        "is_buy": order.is_buy,
        "instrument": order.instrument.value(),
        "limit_price": order.limit_price.to_string(),
        "amount": order.amount.to_string(),
        "salt": order.salt.to_string(),
        "signature": order.signature,
        "post_only": post_only,
        "reduce_only": reduce_only,
        "close_position": false,
        "timestamp": order.timestamp,
    })
}
