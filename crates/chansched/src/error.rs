//! Unified error type for scheduling operations

use thiserror::Error;

/// Errors surfaced by the pool, ledger and durable store.
///
/// `Conflict` and `InvalidState` are expected races and are handled pair by
/// pair inside an allocation cycle; `Unavailable` aborts the whole cycle so
/// no partial commit can be left behind.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("channel {channel_id} is already allocated")]
    Conflict { channel_id: u32 },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("request {request_id} is {actual}, expected {expected}")]
    InvalidState {
        request_id: String,
        expected: &'static str,
        actual: String,
    },

    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl SchedError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Result type for scheduling operations
pub type Result<T> = std::result::Result<T, SchedError>;
