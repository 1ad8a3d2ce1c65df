//! Invocation envelope exchanged with the host runtime.

use std::{collections::HashMap, str::FromStr};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BindingError, Result};

pub const METADATA_KEY_BLOB_NAME: &str = "blobName";
pub const METADATA_KEY_OFFSET: &str = "offset";
pub const METADATA_KEY_COUNT: &str = "count";
pub const METADATA_KEY_DATA: &str = "data";
pub const METADATA_KEY_MARKER: &str = "marker";
pub const METADATA_KEY_NUMBER: &str = "number";
pub const METADATA_KEY_INCLUDE_METADATA: &str = "includeMetadata";
pub const METADATA_KEY_CONTENT_TYPE: &str = "contentType";
pub const METADATA_KEY_CONTENT_ENCODING: &str = "contentEncoding";
pub const METADATA_KEY_CONTENT_LANGUAGE: &str = "contentLanguage";
pub const METADATA_KEY_CONTENT_DISPOSITION: &str = "contentDisposition";
pub const METADATA_KEY_CACHE_CONTROL: &str = "cacheControl";
pub const METADATA_KEY_CONTENT_MD5: &str = "contentMD5";
pub const METADATA_KEY_DELETE_SNAPSHOTS: &str = "deleteSnapshots";
pub const METADATA_KEY_CONTENT_LENGTH: &str = "Content-Length";
pub const METADATA_KEY_BUFFERED_BYTES: &str = "bufferedBytes";
pub const METADATA_KEY_PART_NUMBER: &str = "partNumber";
pub const METADATA_KEY_PARTS: &str = "parts";
pub const METADATA_KEY_SIZE: &str = "size";
pub const METADATA_KEY_ABORTED: &str = "aborted";

/// Keys that steer an operation and never end up as blob user metadata.
const RESERVED_KEYS: &[&str] = &[
    METADATA_KEY_BLOB_NAME,
    METADATA_KEY_OFFSET,
    METADATA_KEY_COUNT,
    METADATA_KEY_DATA,
    METADATA_KEY_MARKER,
    METADATA_KEY_NUMBER,
    METADATA_KEY_INCLUDE_METADATA,
    METADATA_KEY_CONTENT_TYPE,
    METADATA_KEY_CONTENT_ENCODING,
    METADATA_KEY_CONTENT_LANGUAGE,
    METADATA_KEY_CONTENT_DISPOSITION,
    METADATA_KEY_CACHE_CONTROL,
    METADATA_KEY_CONTENT_MD5,
    METADATA_KEY_DELETE_SNAPSHOTS,
];

/// PascalCase spellings still accepted for the option keys.
const LEGACY_KEYS: &[(&str, &str)] = &[
    ("ContentType", METADATA_KEY_CONTENT_TYPE),
    ("ContentEncoding", METADATA_KEY_CONTENT_ENCODING),
    ("ContentLanguage", METADATA_KEY_CONTENT_LANGUAGE),
    ("ContentDisposition", METADATA_KEY_CONTENT_DISPOSITION),
    ("CacheControl", METADATA_KEY_CACHE_CONTROL),
    ("ContentMD5", METADATA_KEY_CONTENT_MD5),
    ("DeleteSnapshotOptions", METADATA_KEY_DELETE_SNAPSHOTS),
];

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Create,
    Get,
    Delete,
    List,
    Head,
    Put,
    #[strum(to_string = "putblocklist", serialize = "complete")]
    PutBlockList,
    Abort,
}

impl OperationKind {
    pub fn parse(operation: &str) -> Result<Self> {
        OperationKind::from_str(operation).map_err(|_| BindingError::UnsupportedOperation {
            operation: operation.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub operation: OperationKind,
    pub data: Bytes,
    pub metadata: HashMap<String, String>,
}

impl InvokeRequest {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            data: Bytes::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Non-empty metadata value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn blob_name(&self) -> Result<&str> {
        self.get(METADATA_KEY_BLOB_NAME)
            .ok_or_else(|| BindingError::validation("blobName is required"))
    }

    /// Parse an optional boolean; a missing key is false.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(value) => parse_bool(value).ok_or_else(|| {
                BindingError::validation(format!("{} must be a boolean, got {}", key, value))
            }),
        }
    }

    /// Rewrite legacy PascalCase keys to their camelCase names. An explicit
    /// camelCase value wins over its legacy spelling.
    pub fn normalize_metadata(&mut self) {
        for (legacy, current) in LEGACY_KEYS {
            if let Some(value) = self.metadata.remove(*legacy) {
                if !value.is_empty() && !self.metadata.contains_key(*current) {
                    self.metadata.insert(current.to_string(), value);
                }
            }
        }
    }

    /// Metadata entries that are not operation parameters.
    pub fn user_metadata(&self) -> HashMap<String, String> {
        self.metadata
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub data: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl InvokeResponse {
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Boolean spellings accepted by the host runtime.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(OperationKind::PutBlockList.to_string(), "putblocklist");
        assert_eq!(
            OperationKind::parse("complete").unwrap(),
            OperationKind::PutBlockList
        );
        assert_eq!(
            OperationKind::parse("putblocklist").unwrap(),
            OperationKind::PutBlockList
        );
        for op in OperationKind::iter() {
            assert_eq!(OperationKind::parse(&op.to_string()).unwrap(), op);
        }
        assert!(matches!(
            OperationKind::parse("copy"),
            Err(BindingError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_normalize_legacy_keys() {
        let mut request = InvokeRequest::new(OperationKind::Create)
            .with_metadata("ContentType", "text/plain")
            .with_metadata("CacheControl", "no-cache")
            .with_metadata("cacheControl", "max-age=60");
        request.normalize_metadata();

        assert_eq!(request.get(METADATA_KEY_CONTENT_TYPE), Some("text/plain"));
        assert_eq!(request.get(METADATA_KEY_CACHE_CONTROL), Some("max-age=60"));
        assert!(!request.metadata.contains_key("ContentType"));
    }

    #[test]
    fn test_normalize_legacy_snapshot_and_md5_keys() {
        let mut request = InvokeRequest::new(OperationKind::Delete)
            .with_metadata("DeleteSnapshotOptions", "include")
            .with_metadata("ContentMD5", "1B2M2Y8AsgTpgAmY7PhCfg==");
        request.normalize_metadata();

        assert_eq!(request.get(METADATA_KEY_DELETE_SNAPSHOTS), Some("include"));
        assert_eq!(
            request.get(METADATA_KEY_CONTENT_MD5),
            Some("1B2M2Y8AsgTpgAmY7PhCfg==")
        );
        assert!(request.user_metadata().is_empty());
    }

    #[test]
    fn test_user_metadata_skips_reserved_keys() {
        let request = InvokeRequest::new(OperationKind::Create)
            .with_metadata(METADATA_KEY_BLOB_NAME, "a.txt")
            .with_metadata(METADATA_KEY_CONTENT_TYPE, "text/plain")
            .with_metadata("owner", "ops");
        let user = request.user_metadata();
        assert_eq!(user.len(), 1);
        assert_eq!(user.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn test_bool_parsing() {
        let request = InvokeRequest::new(OperationKind::Get)
            .with_metadata("a", "TRUE")
            .with_metadata("b", "maybe");
        assert!(request.get_bool("a").unwrap());
        assert!(!request.get_bool("missing").unwrap());
        assert!(request.get_bool("b").is_err());
    }

    #[test]
    fn test_blob_name_required() {
        let request =
            InvokeRequest::new(OperationKind::Get).with_metadata(METADATA_KEY_BLOB_NAME, "");
        assert!(matches!(
            request.blob_name(),
            Err(BindingError::Validation { .. })
        ));
    }
}
