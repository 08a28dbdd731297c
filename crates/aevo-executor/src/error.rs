//! Executor error types.

use crate::signer::SignerError;
use aevo_core::CoreError;
use thiserror::Error;

/// Errors from the fill-driven grid reaction.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("Invalid fill: {0}")]
    InvalidFill(#[from] CoreError),

    #[error("Signing failed: {0}")]
    Signing(#[from] SignerError),

    #[error("Replacement order {order_id} was not delivered")]
    SubmissionDropped { order_id: String },

    #[error("Cancel request for {target} was not delivered")]
    CancelDropped { target: String },
}

pub type GridResult<T> = Result<T, GridError>;
