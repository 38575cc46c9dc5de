//! Error types for the dispatch layer.

use impact_providers::ProviderError;
use impact_state::StateError;
use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}
