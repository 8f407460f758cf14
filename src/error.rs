//! Engine Errors
//!
//! Every stage of the engine reports through [`EngineError`]. Mapping errors
//! are raised before any network call; remote errors keep the underlying
//! [`RemoteError`] together with its classification so callers can tell
//! not-found, transient and terminal failures apart.

use crate::remote::{ErrorClass, RemoteError};
use thiserror::Error;

/// Result alias used across the engine
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A rule, descriptor or state references a field the field tree lacks
    #[error("unknown field `{field}` referenced by {context}")]
    UnknownField { field: String, context: String },

    #[error("invalid rule for field `{field}`: {reason}")]
    InvalidRule { field: String, reason: String },

    #[error("invalid descriptor `{resource}`: {reason}")]
    InvalidDescriptor { resource: String, reason: String },

    /// Runtime value does not match the declared kind/cardinality
    #[error("field `{field}`: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// Response value present but with an incompatible shape
    #[error("response key `{key}`: expected {expected} for field `{field}`, found {found}")]
    ShapeMismatch {
        key: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("extracting `{key}` into `{field}` failed: {reason}")]
    Extraction {
        key: String,
        field: String,
        reason: String,
    },

    #[error("identity field `{field}` is missing")]
    MissingIdentity { field: String },

    /// A write succeeded but the entity could not be read back
    #[error("{resource} `{id}` was written but could not be read back")]
    NotReadBack { resource: String, id: String },

    #[error("invalid pagination: {0}")]
    Pagination(String),

    #[error("invalid endpoint `{endpoint}`: {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("{action} failed ({class}) after {attempts} attempt(s): {source}")]
    Remote {
        action: String,
        class: ErrorClass,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("failed to parse descriptor: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse descriptor: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to read descriptor: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Classification of a remote failure, if this is one
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            EngineError::Remote { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// The remote error carried by this error, if any
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            EngineError::Remote { source, .. } => Some(source),
            _ => None,
        }
    }

    /// True for errors detected locally before any network call
    pub fn is_mapping(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownField { .. }
                | EngineError::InvalidRule { .. }
                | EngineError::TypeMismatch { .. }
                | EngineError::ShapeMismatch { .. }
                | EngineError::Extraction { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == Some(ErrorClass::NotFound)
    }
}
