//! Error types for the `ragline-core` crate.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::orchestrator::QueryState;

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Timeouts, 5xx responses, and rate-limit signals from the provider itself.
    Transient,
    /// Invalid input, authentication failures, malformed responses.
    Permanent,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

impl ProviderErrorKind {
    /// Classify an HTTP status code returned by a provider.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 425 | 429 => Self::Transient,
            500..=599 => Self::Transient,
            _ => Self::Permanent,
        }
    }
}

/// A single document that could not be ingested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    /// Position of the document in the ingest request.
    pub index: usize,
    /// The document's identifier.
    pub document_id: String,
    /// A description of the failure.
    pub reason: String,
}

impl fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document '{}' (#{}): {}", self.document_id, self.index, self.reason)
    }
}

/// Errors that can occur in retrieval, ingestion, and generation.
#[derive(Debug, Error)]
pub enum RagError {
    /// Bad or empty input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An embedding or LLM provider call failed.
    #[error("Provider error ({provider}, {kind}): {message}")]
    Provider {
        /// The provider that produced the error.
        provider: String,
        /// Whether the failure may succeed on retry.
        kind: ProviderErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// An external call did not finish within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// Every document in an ingest call failed.
    #[error("Ingestion failed for {} document(s): {}", failures.len(), join_failures(failures))]
    Batch {
        /// One entry per failed document.
        failures: Vec<DocumentFailure>,
    },

    /// Admission was denied by the rate limiter.
    #[error("Rate limit exceeded for route '{route}', retry after {retry_after:?}")]
    RateLimited {
        /// The bucket key that rejected the request.
        route: String,
        /// Time until at least one token is available.
        retry_after: Duration,
    },

    /// A lookup found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStore {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn join_failures(failures: &[DocumentFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl RagError {
    /// Shorthand for a transient provider error.
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Shorthand for a permanent provider error.
    pub fn permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Returns `true` if the retry policy may attempt the call again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provider { kind: ProviderErrorKind::Transient, .. } | Self::Timeout { .. }
        )
    }

    /// The protocol-level status a request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::RateLimited { .. } => 429,
            Self::Provider { .. } | Self::Timeout { .. } | Self::Batch { .. } => 503,
            Self::VectorStore { .. } | Self::Config(_) => 500,
        }
    }

    /// The terminal query state this error corresponds to.
    pub fn terminal_state(&self) -> QueryState {
        match self {
            Self::Validation(_) => QueryState::Invalid,
            Self::RateLimited { .. } => QueryState::Rejected,
            _ => QueryState::Failed,
        }
    }

    /// The `retry_after` hint for rate-limit rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ProviderErrorKind::from_status(429), ProviderErrorKind::Transient);
        assert_eq!(ProviderErrorKind::from_status(503), ProviderErrorKind::Transient);
        assert_eq!(ProviderErrorKind::from_status(401), ProviderErrorKind::Permanent);
        assert_eq!(ProviderErrorKind::from_status(400), ProviderErrorKind::Permanent);
    }

    #[test]
    fn rejection_and_failure_are_distinguishable() {
        let limited =
            RagError::RateLimited { route: "query".into(), retry_after: Duration::from_secs(1) };
        let failed = RagError::transient("OpenAI", "502 bad gateway");

        assert_eq!(limited.status_code(), 429);
        assert_eq!(failed.status_code(), 503);
        assert_eq!(limited.terminal_state(), QueryState::Rejected);
        assert_eq!(failed.terminal_state(), QueryState::Failed);
        assert!(!limited.is_transient());
        assert!(failed.is_transient());
    }

    #[test]
    fn batch_error_names_documents() {
        let err = RagError::Batch {
            failures: vec![DocumentFailure {
                index: 1,
                document_id: "doc-b".into(),
                reason: "embedding failed".into(),
            }],
        };
        assert!(err.to_string().contains("doc-b"));
    }
}
