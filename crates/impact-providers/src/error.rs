//! Provider error classification.

use std::time::Duration;

use impact_core::FailureKind;
use thiserror::Error;

use crate::http::HttpResponse;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Every provider failure falls into exactly one of these.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The source asked us to slow down.
    #[error("{provider}: rate limited")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// Network failure, timeout or 5xx. Retryable.
    #[error("{provider}: unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    /// The payload did not have the expected shape, or the source rejected
    /// the id permanently. Not retryable.
    #[error("{provider}: malformed content: {reason}")]
    ContentMalformed { provider: String, reason: String },

    /// The caller passed an alias outside this provider's namespaces.
    #[error("{provider}: alias not relevant: {alias}")]
    NotRelevant { provider: String, alias: String },
}

impl ProviderError {
    pub fn unavailable(provider: &str, reason: impl Into<String>) -> Self {
        ProviderError::Unavailable {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed(provider: &str, reason: impl Into<String>) -> Self {
        ProviderError::ContentMalformed {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_relevant(provider: &str, alias: impl Into<String>) -> Self {
        ProviderError::NotRelevant {
            provider: provider.to_string(),
            alias: alias.into(),
        }
    }

    /// Whether the dispatch layer may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Unavailable { .. }
        )
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::RateLimited { .. } => FailureKind::RateLimited,
            ProviderError::Unavailable { .. } => FailureKind::Unavailable,
            ProviderError::ContentMalformed { .. } => FailureKind::ContentMalformed,
            ProviderError::NotRelevant { .. } => FailureKind::NotRelevant,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderError::RateLimited { provider, .. }
            | ProviderError::Unavailable { provider, .. }
            | ProviderError::ContentMalformed { provider, .. }
            | ProviderError::NotRelevant { provider, .. } => provider,
        }
    }

    /// Server-suggested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify a non-success HTTP response.
    pub fn from_response(provider: &str, response: &HttpResponse) -> Self {
        let status = response.status;
        let rate_limited = status == 429
            || (status == 403 && response.body.to_ascii_lowercase().contains("rate limit"));
        if rate_limited {
            ProviderError::RateLimited {
                provider: provider.to_string(),
                retry_after: response.retry_after,
            }
        } else if status >= 500 {
            ProviderError::unavailable(provider, format!("status {status}"))
        } else {
            ProviderError::malformed(provider, format!("status {status}"))
        }
    }

    pub fn from_transport(provider: &str, err: &TransportError) -> Self {
        ProviderError::unavailable(provider, err.to_string())
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, Error)]
#[error("request to {url} failed: {reason}")]
pub struct TransportError {
    pub url: String,
    pub reason: String,
    pub timed_out: bool,
}
