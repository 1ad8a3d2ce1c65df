//! Core object store adapter trait.

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    BlobMetadata,
    BlobResult,
    CompletedPart,
    DeleteObjectOptions,
    ListPage,
    ListRequest,
    PutObjectOptions,
};

/// Thin facade over a remote object store.
///
/// Keys are relative to the bucket or container the adapter was built for.
/// Implementations hold no per-upload state; multipart sessions are tracked by
/// the caller and identified by the upload id returned from
/// [`create_multipart_upload`](Self::create_multipart_upload).
#[async_trait]
pub trait ObjectStoreAdapter: Send + Sync {
    /// Upload a whole object, replacing any previous version.
    ///
    /// Returns the URL of the stored object.
    async fn put_object(&self, key: &str, data: Bytes, options: PutObjectOptions)
        -> BlobResult<String>;

    /// Download an object, optionally only the given byte range.
    ///
    /// Returns `BlobError::NotFound` if the object doesn't exist.
    async fn get_object(&self, key: &str, range: Option<Range<u64>>) -> BlobResult<Bytes>;

    /// Delete an object. Snapshot handling is honoured by stores that keep
    /// snapshots and ignored elsewhere.
    async fn delete_object(&self, key: &str, options: DeleteObjectOptions) -> BlobResult<()>;

    /// Get object metadata without downloading content.
    ///
    /// Returns `BlobError::NotFound` if the object doesn't exist.
    async fn head_object(&self, key: &str) -> BlobResult<BlobMetadata>;

    /// Fetch one page of a segmented listing.
    async fn list_objects(&self, request: &ListRequest) -> BlobResult<ListPage>;

    // --- Multipart Upload Operations ---

    /// Create a multipart upload session.
    ///
    /// Returns an upload ID used for subsequent operations.
    async fn create_multipart_upload(&self, key: &str) -> BlobResult<String>;

    /// Upload one part of a multipart upload.
    ///
    /// Part numbers start from 1. Returns the tag the store assigned to the
    /// part, which must be handed back on completion.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BlobResult<String>;

    /// Complete a multipart upload.
    ///
    /// `parts` is in content order: the committed object is the concatenation
    /// of the parts in the order given, whatever their part numbers are.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BlobResult<()>;

    /// Abort a multipart upload.
    ///
    /// Cancels the upload and cleans up partial data where the store allows it.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BlobResult<()>;

    /// Location of `key` as exposed to clients.
    fn object_url(&self, key: &str) -> String;
}
