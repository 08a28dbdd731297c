//! Observability for the Aevo grid client.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics with a static `Metrics` facade
//! - Webhook alerts for operator-visible events

pub mod error;
pub mod logging;
pub mod metrics;
pub mod notifier;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{Metrics, MetricsSnapshot};
pub use notifier::{order_failure_message, Notifier};
