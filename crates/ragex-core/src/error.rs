use thiserror::Error;

use crate::types::ValidationIssue;

/// The single error type shared across every ragex crate (§7).
#[derive(Error, Debug)]
pub enum RagexError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("concurrent modification of {path}")]
    Conflict { path: String },

    #[error("validation failed for {path}: {issues:?}")]
    ValidationFailed {
        path: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("upstream collaborator failed: {0}")]
    Upstream(String),

    #[error("cache integrity error: {0}")]
    Integrity(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl RagexError {
    /// A stable, user-facing tag independent of the message text (§7 "every
    /// surfaced error carries a stable `kind` tag").
    pub fn kind(&self) -> &'static str {
        match self {
            RagexError::NotFound(_) => "not_found",
            RagexError::Invalid(_) => "invalid",
            RagexError::Conflict { .. } => "conflict",
            RagexError::ValidationFailed { .. } => "validation_failed",
            RagexError::Upstream(_) => "upstream",
            RagexError::Integrity(_) => "integrity",
            RagexError::Io { .. } => "io",
            RagexError::Cancelled => "cancelled",
            RagexError::Serialization(_) => "integrity",
            RagexError::Encode(_) => "integrity",
            RagexError::Decode(_) => "integrity",
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        RagexError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_across_variants() {
        assert_eq!(RagexError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            RagexError::Conflict { path: "a".into() }.kind(),
            "conflict"
        );
    }
}
