//! Object metadata structures.

use std::{collections::HashMap, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata about a stored object, as returned by a head request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Size in bytes.
    pub size_bytes: u64,

    /// ETag from the object store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Content type / MIME type (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    /// User-defined metadata attached at upload time.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub user_metadata: HashMap<String, String>,
}

impl BlobMetadata {
    /// Create metadata with just size.
    pub fn with_size(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            ..Default::default()
        }
    }
}

/// HTTP headers and user metadata applied to a whole-object upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectOptions {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,

    /// MD5 digest of the payload. Azure verifies and stores it with the blob;
    /// the other stores ignore it.
    pub content_md5: Option<[u8; 16]>,

    /// User-defined metadata.
    pub metadata: HashMap<String, String>,
}

/// What happens to the snapshots of a blob that is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteSnapshots {
    /// Delete the blob together with its snapshots.
    Include,
    /// Delete only the snapshots and keep the base blob.
    Only,
}

impl FromStr for DeleteSnapshots {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "include" => Ok(DeleteSnapshots::Include),
            "only" => Ok(DeleteSnapshots::Only),
            other => Err(format!(
                "invalid delete snapshot option type: {}; allowed: include, only",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteObjectOptions {
    /// `None` deletes the blob and fails on stores where it still has
    /// snapshots.
    pub snapshots: Option<DeleteSnapshots>,
}

#[cfg(any(feature = "aws", feature = "azure"))]
impl PutObjectOptions {
    /// Convert into object_store attributes.
    pub(crate) fn to_attributes(&self) -> object_store::Attributes {
        use object_store::{Attribute, Attributes};

        let mut attributes = Attributes::new();
        let headers = [
            (Attribute::ContentType, &self.content_type),
            (Attribute::ContentEncoding, &self.content_encoding),
            (Attribute::ContentLanguage, &self.content_language),
            (Attribute::ContentDisposition, &self.content_disposition),
            (Attribute::CacheControl, &self.cache_control),
        ];
        for (attribute, value) in headers {
            if let Some(value) = value {
                attributes.insert(attribute, value.clone().into());
            }
        }
        for (key, value) in &self.metadata {
            attributes.insert(Attribute::Metadata(key.clone().into()), value.clone().into());
        }
        attributes
    }
}

/// Build metadata from an object_store head/get response.
#[cfg(any(feature = "aws", feature = "azure"))]
pub(crate) fn metadata_from_attributes(
    meta: &object_store::ObjectMeta,
    attributes: &object_store::Attributes,
) -> BlobMetadata {
    use object_store::Attribute;

    let mut metadata = BlobMetadata {
        size_bytes: meta.size,
        etag: meta.e_tag.clone(),
        content_type: None,
        last_modified: Some(meta.last_modified),
        user_metadata: HashMap::new(),
    };
    for (attribute, value) in attributes.iter() {
        match attribute {
            Attribute::ContentType => metadata.content_type = Some(value.to_string()),
            Attribute::Metadata(key) => {
                metadata
                    .user_metadata
                    .insert(key.to_string(), value.to_string());
            }
            _ => {}
        }
    }
    metadata
}
