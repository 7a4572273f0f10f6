//! Failure taxonomy for the retrieval pipeline.

use std::fmt;

use thiserror::Error;

use crate::model::LocationKey;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Empty or whitespace-only query; rejected before any index call.
    #[error("query text must not be empty")]
    InvalidQuery,
    /// The embedder or the text collection could not be reached.
    #[error("text retrieval unavailable: {source:#}")]
    RetrievalUnavailable {
        /// Underlying collaborator failure.
        #[source]
        source: anyhow::Error,
    },
    /// The scoring model failed for at least one candidate.
    #[error("rerank failed: {reason}")]
    RerankFailure {
        /// What went wrong.
        reason: String,
    },
}

impl RetrievalError {
    pub(crate) fn unavailable(source: anyhow::Error) -> Self {
        Self::RetrievalUnavailable { source }
    }

    pub(crate) fn rerank(reason: impl Into<String>) -> Self {
        Self::RerankFailure {
            reason: reason.into(),
        }
    }
}

/// Non-fatal outcome of a failed image lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLinkWarning {
    /// Locations that were being looked up.
    pub locations: Vec<LocationKey>,
    /// Rendered cause.
    pub message: String,
}

impl fmt::Display for ImageLinkWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "image lookup for {} location(s) failed: {}",
            self.locations.len(),
            self.message
        )
    }
}

/// Reasons a payload cannot become a typed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Field absent or null.
    #[error("payload missing required field `{0}`")]
    MissingField(String),
    /// Field present with the wrong shape.
    #[error("payload field `{field}` is invalid: {reason}")]
    InvalidField {
        /// Field name.
        field: String,
        /// Description of the problem.
        reason: String,
    },
}
