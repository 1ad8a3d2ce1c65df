//! Error types for object store adapter operations.

use std::fmt;

/// Result type for object store adapter operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur while talking to an object store.
#[derive(Debug)]
pub enum BlobError {
    /// Object not found under the given key.
    NotFound { key: String },

    /// Object already exists and the write asked not to overwrite it.
    AlreadyExists { key: String },

    /// Key or location could not be mapped onto the store.
    InvalidKey { key: String, reason: String },

    /// Store could not be configured (bad bucket, account, credentials).
    Configuration { reason: String },

    /// I/O error during a local operation.
    IoError { source: std::io::Error },

    /// Network or service error returned by S3/Azure.
    NetworkError { source: anyhow::Error },

    /// Multipart protocol error.
    MultipartError { reason: String },

    /// Generic error.
    Other { source: anyhow::Error },
}

impl BlobError {
    pub fn multipart(reason: impl Into<String>) -> Self {
        BlobError::MultipartError {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::NotFound { key } => write!(f, "Object not found: {}", key),
            BlobError::AlreadyExists { key } => write!(f, "Object already exists: {}", key),
            BlobError::InvalidKey { key, reason } => {
                write!(f, "Invalid key '{}': {}", key, reason)
            }
            BlobError::Configuration { reason } => {
                write!(f, "Invalid store configuration: {}", reason)
            }
            BlobError::IoError { source } => write!(f, "I/O error: {}", source),
            BlobError::NetworkError { source } => write!(f, "Network error: {}", source),
            BlobError::MultipartError { reason } => write!(f, "Multipart upload error: {}", reason),
            BlobError::Other { source } => write!(f, "Object store error: {}", source),
        }
    }
}

impl std::error::Error for BlobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobError::IoError { source } => Some(source),
            BlobError::NetworkError { source } => Some(source.as_ref()),
            BlobError::Other { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        BlobError::IoError { source: err }
    }
}

impl From<anyhow::Error> for BlobError {
    fn from(err: anyhow::Error) -> Self {
        BlobError::Other { source: err }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound { key: path },
            object_store::Error::AlreadyExists { path, .. } => {
                BlobError::AlreadyExists { key: path }
            }
            object_store::Error::InvalidPath { .. } => BlobError::InvalidKey {
                key: String::new(),
                reason: err.to_string(),
            },
            _ => BlobError::NetworkError {
                source: anyhow::Error::from(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_store_not_found_maps_to_not_found() {
        let err = object_store::Error::NotFound {
            path: "a/b".to_string(),
            source: "missing".into(),
        };
        let blob_err = BlobError::from(err);
        assert!(blob_err.is_not_found());
        assert_eq!(blob_err.to_string(), "Object not found: a/b");
    }

    #[test]
    fn test_generic_object_store_error_is_network() {
        let err = object_store::Error::Generic {
            store: "S3",
            source: "connection reset".into(),
        };
        let blob_err = BlobError::from(err);
        assert!(matches!(blob_err, BlobError::NetworkError { .. }));
        assert!(std::error::Error::source(&blob_err).is_some());
    }
}
