use thiserror::Error;

use crate::types::SourceKind;

/// Failure taxonomy of the retrieval engine.
///
/// `BackendUnavailable` and `RerankUnavailable` are recovered inside the
/// engine (logged, reflected in the `ResultSet` flags); `RetrievalUnavailable`
/// and `Cancelled` reach the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{source_kind} backend unavailable: {reason}")]
    BackendUnavailable { source_kind: SourceKind, reason: String },

    #[error("retrieval unavailable (dense: {dense}; lexical: {lexical})")]
    RetrievalUnavailable { dense: String, lexical: String },

    #[error("reranker unavailable: {0}")]
    RerankUnavailable(String),

    #[error("retrieval cancelled by caller")]
    Cancelled,

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
