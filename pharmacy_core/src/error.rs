//! Error types for the pharmacy_core library.

use std::io;
use std::path::PathBuf;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for pharmacy_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A persisted row does not match the typed record schema
    #[error("Schema error in {file:?} at line {line}: {message}")]
    Schema {
        file: PathBuf,
        line: u64,
        message: String,
    },

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Referenced record does not exist
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Identifier already in use
    #[error("{entity} '{id}' already exists")]
    DuplicateId { entity: &'static str, id: String },

    /// Missing required field or value out of range
    #[error("Validation error: {0}")]
    Validation(String),

    /// Delete blocked by an active reference
    #[error("Cannot delete {entity} '{id}': {reason}")]
    ReferentialIntegrity {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn duplicate(entity: &'static str, id: impl Into<String>) -> Self {
        Error::DuplicateId {
            entity,
            id: id.into(),
        }
    }

    /// True for failures of the underlying files rather than of the request
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Json(_) | Error::Csv(_) | Error::Toml(_) | Error::Schema { .. }
        )
    }
}
