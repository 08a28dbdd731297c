//! Aevo grid trading bot.
//!
//! Main application that orchestrates all components:
//! - Authenticated WebSocket session with resubscription on reconnect
//! - Startup bootstrap over REST (flatten, ladder, stop-loss)
//! - Fill-driven grid replacement orders
//! - Local snapshots, metrics and webhook alerts

pub mod app;
pub mod config;
pub mod error;
pub mod handler;

pub use app::{Application, BootstrapReport, Credentials};
pub use config::{AppConfig, RangeMode, ShutdownCancel};
pub use error::{AppError, AppResult};
pub use handler::GridHandler;
