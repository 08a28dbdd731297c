//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] aevo_ws::WsError),

    #[error("Registry error: {0}")]
    Registry(#[from] aevo_registry::RegistryError),

    #[error("Key error: {0}")]
    Key(#[from] aevo_executor::KeyError),

    #[error("Signer error: {0}")]
    Signer(#[from] aevo_executor::SignerError),

    #[error("Grid error: {0}")]
    Grid(#[from] aevo_core::CoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] aevo_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] aevo_persistence::PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
