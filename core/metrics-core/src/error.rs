//! Error types for spec-metrics operations.

use std::path::PathBuf;

use crate::schema::ValidationError;

/// All errors that can occur in spec-metrics-core operations.
///
/// Missing files are never errors here: absent logs and checkpoints are
/// treated as empty state by the callers that read them.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    // ─────────────────────────────────────────────────────────────────────
    // Contract Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid metric record: {reason}")]
    InvalidRecord {
        #[source]
        reason: ValidationError,
    },

    #[error("Unknown phase: {0}")]
    InvalidPhase(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl MetricsError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MetricsError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        MetricsError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using MetricsError.
pub type Result<T> = std::result::Result<T, MetricsError>;

impl From<MetricsError> for String {
    fn from(err: MetricsError) -> String {
        err.to_string()
    }
}
