//! Core domain types for the Aevo grid trading client.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - `Price`, `Size`: precision-safe numeric types and fixed-point conversion
//! - `OrderSide`, `InstrumentId`: trading identifiers
//! - `Fill`: validated fill notification
//! - `GridParams`, `GridRange`: grid arithmetic (opposite price, ladder levels)
//! - `Network`: testnet/mainnet endpoints and signing domain

pub mod decimal;
pub mod error;
pub mod fill;
pub mod grid;
pub mod network;
pub mod order;

pub use decimal::{to_fixed_point, Price, Size, MAX_FIXED_POINT_DECIMALS};
pub use error::{CoreError, Result};
pub use fill::Fill;
pub use grid::{GridParams, GridRange};
pub use network::Network;
pub use order::{InstrumentId, OrderSide};
