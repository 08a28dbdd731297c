//! Local snapshots for the Aevo grid client.
//!
//! Keeps the latest ticker payloads per asset and the order-update history,
//! mirrored to JSON files so they can be inspected while the bot runs.

pub mod error;
pub mod snapshot;

pub use error::{PersistenceError, PersistenceResult};
pub use snapshot::{SnapshotStore, DEFAULT_MAX_PENDING, TICKER_HISTORY};
