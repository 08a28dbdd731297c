//! Order execution for the Aevo grid client.
//!
//! - `signer`: signing key loading and EIP-712 order signing (`OrderSigner`)
//! - `command`: `create_order` / cancel frames and REST bodies
//! - `order_sender`: submission seam (`OrderSender`) over the WebSocket
//!   connection, plus `MockOrderSender` for tests
//! - `grid`: `GridEngine`, the fill-driven replacement rule and session
//!   order cancellation
//!
//! # Flow
//!
//! ```text
//! fills frame -> GridEngine::on_fill -> OrderSigner::sign
//!             -> command::create_order -> OrderSender::send
//! ```

pub mod command;
pub mod error;
pub mod grid;
pub mod order_sender;
pub mod signer;

pub use command::OrderFlags;
pub use error::{GridError, GridResult};
pub use grid::{
    GridEngine, GridReaction, Replacement, DEFAULT_HISTORY_CAPACITY, DEFAULT_TRACKED_ORDERS,
};
pub use order_sender::{MockOrderSender, OrderSender, WsOrderSender};
pub use signer::{
    encode_signature, KeyError, KeyManager, KeySource, OrderRequest, OrderScale, OrderSigner,
    SignedOrder, SignerError,
};
