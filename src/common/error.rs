//! Error types for the import pipeline and the build store.

use thiserror::Error;

/// Failures raised while turning a JSON report into a persisted build.
///
/// Everything except [`ImportError::Storage`] is raised before the store is
/// touched, so a failed import never leaves a partial tree behind.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The payload declares a schema version we cannot read.
    #[error("unsupported payload version: {0}")]
    UnsupportedVersion(u64),

    /// A key required by the payload schema is absent.
    #[error("missing required field `{field}` in {context}")]
    MissingField { field: String, context: String },

    /// A key is present but holds a value of the wrong shape.
    #[error("invalid value for `{field}` in {context}: {detail}")]
    InvalidField {
        field: String,
        context: String,
        detail: String,
    },

    /// The build timestamp could not be parsed.
    #[error("invalid timestamp {value:?}: {detail}")]
    InvalidTimestamp { value: String, detail: String },

    #[error("you must specify a project")]
    MissingProject,

    #[error("you must specify a revision")]
    MissingRevision,

    /// The payload is not valid JSON or does not match the report schema.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ImportError {
    pub(crate) fn missing(field: impl Into<String>, context: impl Into<String>) -> Self {
        ImportError::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub(crate) fn invalid(
        field: impl Into<String>,
        context: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        ImportError::InvalidField {
            field: field.into(),
            context: context.into(),
            detail: detail.into(),
        }
    }
}

/// Failures of the persistence backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(#[from] sled::Error),

    #[error("failed to encode or decode a stored build: {0}")]
    Codec(#[from] bincode::Error),

    #[error("failed to encode or decode a stored trace: {0}")]
    Json(#[from] serde_json::Error),
}
