//! Error types for the risk core

use std::path::PathBuf;
use thiserror::Error;

/// Infrastructure and contract failures.
///
/// Expected "not enough data" conditions are not errors; they are reported
/// through [`crate::outcome::FailureReason`] inside structured outcomes.
#[derive(Error, Debug)]
pub enum RiskError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored artifact exists but cannot be trusted
    #[error("Corrupt artifact at {path}: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    /// Bundle was fit against a different feature layout
    #[error("Schema mismatch for {scope}: expected {expected}, found {actual}")]
    SchemaMismatch {
        scope: String,
        expected: String,
        actual: String,
    },

    /// Log record violates a field bound
    #[error("Invalid log record: {0}")]
    InvalidRecord(String),

    /// Configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Upstream log store failed
    #[error("Log source error: {0}")]
    LogSource(String),
}

impl RiskError {
    /// Short machine-checkable code, used in outcome payloads.
    pub fn code(&self) -> &'static str {
        match self {
            RiskError::Io(_) => "io",
            RiskError::Serialization(_) => "serialization",
            RiskError::CorruptArtifact { .. } => "corrupt_artifact",
            RiskError::SchemaMismatch { .. } => "schema_mismatch",
            RiskError::InvalidRecord(_) => "invalid_record",
            RiskError::InvalidConfig(_) => "invalid_config",
            RiskError::LogSource(_) => "log_source",
        }
    }
}

/// Result type for risk core operations
pub type Result<T> = std::result::Result<T, RiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_mismatch_code_is_stable() {
        let err = RiskError::SchemaMismatch {
            scope: "global".into(),
            expected: "v1".into(),
            actual: "v2".into(),
        };
        assert_eq!(err.code(), "schema_mismatch");
        assert!(err.to_string().contains("global"));
    }
}
