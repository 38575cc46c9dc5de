//! Error types for the item store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Storage failures. The backend propagates these and never retries them.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open item store: {0}")]
    Open(String),

    /// A redb transaction, table, read or write step failed.
    #[error("redb {stage} failed: {reason}")]
    Storage { stage: &'static str, reason: String },

    #[error("could not encode document: {0}")]
    Encode(String),

    #[error("stored document is corrupt: {0}")]
    Decode(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("wrong key for collection {0}")]
    KeyMismatch(String),
}
