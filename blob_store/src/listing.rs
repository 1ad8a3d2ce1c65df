//! Segmented listing types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Largest page a single list round may request.
pub const MAX_PAGE_SIZE: usize = 5000;

/// Extra datasets to include in a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListInclude {
    pub copy: bool,
    pub metadata: bool,
    pub snapshots: bool,
    pub uncommitted_blobs: bool,
    pub deleted: bool,
}

/// A single list round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// Only keys starting with this string are returned.
    pub prefix: Option<String>,

    /// Continuation token from a previous page. Stores that page by key
    /// return only keys strictly after it; Azure treats it as opaque.
    pub marker: Option<String>,

    /// Upper bound on entries in this page, clamped to [`MAX_PAGE_SIZE`].
    pub max_results: usize,

    pub include: ListInclude,
}

impl ListRequest {
    /// Page size actually requested from the store.
    pub fn page_size(&self) -> usize {
        self.max_results.clamp(1, MAX_PAGE_SIZE)
    }

    /// Whether `key` passes the prefix filter.
    pub fn matches(&self, key: &str) -> bool {
        self.prefix
            .as_deref()
            .map(|prefix| key.starts_with(prefix))
            .unwrap_or(true)
    }

    /// Whether `key` sorts after the continuation marker.
    pub fn after_marker(&self, key: &str) -> bool {
        self.marker
            .as_deref()
            .map(|marker| key > marker)
            .unwrap_or(true)
    }
}

/// An entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedBlob {
    pub name: String,
    pub size_bytes: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    /// Populated only when the listing asked for metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,

    /// True for in-progress uploads listed with `uncommittedBlobs`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub uncommitted: bool,

    /// Snapshot timestamp, for snapshot entries listed with `snapshots`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,

    /// Soft-deleted entry listed with `deleted`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,

    /// Source of the last copy into this blob, listed with `copy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_source: Option<String>,
}

impl ListedBlob {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            etag: None,
            last_modified: None,
            metadata: None,
            uncommitted: false,
            snapshot: None,
            deleted: false,
            copy_source: None,
        }
    }
}

/// One page returned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub blobs: Vec<ListedBlob>,

    /// Marker for the next round; `None` once the listing is exhausted.
    pub next_marker: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_deserializes_camel_case_with_defaults() {
        let include: ListInclude =
            serde_json::from_str(r#"{"uncommittedBlobs": true, "metadata": true}"#).unwrap();
        assert!(include.uncommitted_blobs);
        assert!(include.metadata);
        assert!(!include.copy);
        assert!(!include.deleted);
    }

    #[test]
    fn test_page_size_is_clamped() {
        let mut request = ListRequest::default();
        assert_eq!(request.page_size(), 1);
        request.max_results = 20_000;
        assert_eq!(request.page_size(), MAX_PAGE_SIZE);
        request.max_results = 10;
        assert_eq!(request.page_size(), 10);
    }

    #[test]
    fn test_prefix_and_marker_filters() {
        let request = ListRequest {
            prefix: Some("logs/".to_string()),
            marker: Some("logs/b".to_string()),
            ..Default::default()
        };
        assert!(request.matches("logs/c"));
        assert!(!request.matches("data/c"));
        assert!(request.after_marker("logs/c"));
        assert!(!request.after_marker("logs/b"));
        assert!(!request.after_marker("logs/a"));
    }
}
