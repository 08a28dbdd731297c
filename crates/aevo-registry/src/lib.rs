//! REST access to the Aevo exchange.
//!
//! Market lookup (instrument id, mark price, steps), account positions and
//! order management used by the bootstrap and stop-loss paths. Never called
//! from the message loop.

pub mod client;
pub mod error;
pub mod market;

pub use client::{ApiKeys, RestClient};
pub use error::{RegistryError, RegistryResult};
pub use market::{
    find_perp, perp_name, AccountInfo, MarketInfo, Position, RawAccountResponse, RawMarket,
    RawPosition,
};
