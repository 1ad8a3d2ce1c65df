use blob_store::BlobError;

use crate::request::OperationKind;

pub type Result<T, E = BindingError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BindingError {
    #[error("invalid binding configuration: {reason}")]
    Configuration { reason: String },

    #[error("invalid request: {reason}")]
    Validation { reason: String },

    #[error("{operation} failed for blob {key}: {source}")]
    Store {
        operation: OperationKind,
        key: String,
        #[source]
        source: BlobError,
    },

    #[error("no active multipart upload for blob {key}")]
    NoActiveSession { key: String },

    #[error("offset {offset} was already uploaded for blob {key}")]
    DuplicateOffset { key: String, offset: u64 },

    #[error("blob {key} already exists")]
    AlreadyExists { key: String },

    #[error("operation {operation} is not supported")]
    UnsupportedOperation { operation: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BindingError {
    pub fn validation(reason: impl Into<String>) -> Self {
        BindingError::Validation {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        BindingError::Configuration {
            reason: reason.into(),
        }
    }

    /// Attach operation and key context to a store failure.
    pub fn store(operation: OperationKind, key: &str, source: BlobError) -> Self {
        match source {
            BlobError::AlreadyExists { key } => BindingError::AlreadyExists { key },
            BlobError::Configuration { reason } => BindingError::Configuration { reason },
            source => BindingError::Store {
                operation,
                key: key.to_string(),
                source,
            },
        }
    }

    /// Short label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            BindingError::Configuration { .. } => "configuration",
            BindingError::Validation { .. } => "validation",
            BindingError::Store { .. } => "store",
            BindingError::NoActiveSession { .. } => "no_active_session",
            BindingError::DuplicateOffset { .. } => "duplicate_offset",
            BindingError::AlreadyExists { .. } => "already_exists",
            BindingError::UnsupportedOperation { .. } => "unsupported_operation",
            BindingError::Json(_) => "json",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BindingError::Store { source, .. } if source.is_not_found())
    }
}
