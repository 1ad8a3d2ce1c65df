//! In-process object store backend.
//!
//! Commits multipart uploads in the part order handed to
//! `complete_multipart_upload`, the way Azure block lists do. Every adapter
//! call is counted and any operation can be made to fail on demand, which is
//! what the multipart session tests rely on.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Range,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use tracing::debug;

use crate::{
    BlobError,
    BlobMetadata,
    BlobResult,
    CompletedPart,
    DeleteObjectOptions,
    DeleteSnapshots,
    ListPage,
    ListRequest,
    ListedBlob,
    ObjectStoreAdapter,
    PutObjectOptions,
};

/// Adapter operations, used for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    PutObject,
    GetObject,
    DeleteObject,
    HeadObject,
    ListObjects,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    options: PutObjectOptions,
    etag: String,
    last_modified: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    parts: HashMap<u32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    next_id: u64,
    calls: HashMap<StoreOperation, usize>,
    /// Operation -> 1-based call index that should fail.
    failures: HashMap<StoreOperation, Vec<usize>>,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Count the call and report whether it was scheduled to fail.
    fn record_call(&mut self, operation: StoreOperation) -> BlobResult<()> {
        let count = self.calls.entry(operation).or_default();
        *count += 1;
        let call = *count;
        if let Some(planned) = self.failures.get_mut(&operation) {
            if let Some(pos) = planned.iter().position(|n| *n == call) {
                planned.remove(pos);
                return Err(BlobError::NetworkError {
                    source: anyhow::anyhow!("injected failure for {:?} call {}", operation, call),
                });
            }
        }
        Ok(())
    }
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // Every mutation completes before the guard drops, so a poisoned lock
        // still guards consistent maps.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the `nth` (1-based, counted from store creation) call of
    /// `operation` fail with a network error.
    pub fn fail_nth(&self, operation: StoreOperation, nth: usize) {
        self.state().failures.entry(operation).or_default().push(nth);
    }

    /// Number of calls made to `operation` so far.
    pub fn calls(&self, operation: StoreOperation) -> usize {
        self.state().calls.get(&operation).copied().unwrap_or_default()
    }

    /// Number of multipart uploads that were created but neither completed
    /// nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Raw object bytes, bypassing call accounting.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state().objects.get(key).map(|o| o.data.clone())
    }

    /// Options the object was last written with.
    pub fn object_options(&self, key: &str) -> Option<PutObjectOptions> {
        self.state().objects.get(key).map(|o| o.options.clone())
    }

    fn store_object(state: &mut MemoryState, key: &str, data: Bytes, options: PutObjectOptions) {
        let etag = format!("\"{}\"", state.next_id());
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                options,
                etag,
                last_modified: Utc::now(),
            },
        );
    }
}

#[async_trait]
impl ObjectStoreAdapter for MemoryStore {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        options: PutObjectOptions,
    ) -> BlobResult<String> {
        let mut state = self.state();
        state.record_call(StoreOperation::PutObject)?;
        Self::store_object(&mut state, key, data, options);
        Ok(self.object_url(key))
    }

    async fn get_object(&self, key: &str, range: Option<Range<u64>>) -> BlobResult<Bytes> {
        let mut state = self.state();
        state.record_call(StoreOperation::GetObject)?;
        let object = state.objects.get(key).ok_or_else(|| BlobError::NotFound {
            key: key.to_string(),
        })?;
        let Some(range) = range else {
            return Ok(object.data.clone());
        };
        let len = object.data.len() as u64;
        if range.start >= len || range.start > range.end {
            return Err(BlobError::InvalidKey {
                key: key.to_string(),
                reason: format!("range {:?} not satisfiable for {} bytes", range, len),
            });
        }
        let end = range.end.min(len);
        Ok(object.data.slice(range.start as usize..end as usize))
    }

    async fn delete_object(&self, key: &str, options: DeleteObjectOptions) -> BlobResult<()> {
        let mut state = self.state();
        state.record_call(StoreOperation::DeleteObject)?;
        if !state.objects.contains_key(key) {
            return Err(BlobError::NotFound {
                key: key.to_string(),
            });
        }
        // No snapshots are kept, so deleting only them leaves the blob as is.
        if options.snapshots != Some(DeleteSnapshots::Only) {
            state.objects.remove(key);
        }
        Ok(())
    }

    async fn head_object(&self, key: &str) -> BlobResult<BlobMetadata> {
        let mut state = self.state();
        state.record_call(StoreOperation::HeadObject)?;
        let object = state.objects.get(key).ok_or_else(|| BlobError::NotFound {
            key: key.to_string(),
        })?;
        Ok(BlobMetadata {
            size_bytes: object.data.len() as u64,
            etag: Some(object.etag.clone()),
            content_type: object.options.content_type.clone(),
            last_modified: Some(object.last_modified),
            user_metadata: object.options.metadata.clone(),
        })
    }

    async fn list_objects(&self, request: &ListRequest) -> BlobResult<ListPage> {
        let mut state = self.state();
        state.record_call(StoreOperation::ListObjects)?;

        let mut entries: BTreeMap<&str, ListedBlob> = state
            .objects
            .iter()
            .map(|(key, object)| {
                let blob = ListedBlob {
                    etag: Some(object.etag.clone()),
                    last_modified: Some(object.last_modified),
                    metadata: request
                        .include
                        .metadata
                        .then(|| object.options.metadata.clone()),
                    ..ListedBlob::new(key.clone(), object.data.len() as u64)
                };
                (key.as_str(), blob)
            })
            .collect();
        if request.include.uncommitted_blobs {
            for upload in state.uploads.values() {
                if entries.contains_key(upload.key.as_str()) {
                    continue;
                }
                let size_bytes = upload.parts.values().map(|(_, d)| d.len() as u64).sum();
                entries.insert(
                    upload.key.as_str(),
                    ListedBlob {
                        metadata: request.include.metadata.then(HashMap::new),
                        uncommitted: true,
                        ..ListedBlob::new(upload.key.clone(), size_bytes)
                    },
                );
            }
        }

        let page_size = request.page_size();
        let mut matching = entries
            .into_iter()
            .filter(|(key, _)| request.matches(key) && request.after_marker(key))
            .map(|(_, blob)| blob);
        let blobs: Vec<ListedBlob> = matching.by_ref().take(page_size).collect();
        let next_marker = match matching.next() {
            Some(_) => blobs.last().map(|b| b.name.clone()),
            None => None,
        };
        Ok(ListPage { blobs, next_marker })
    }

    async fn create_multipart_upload(&self, key: &str) -> BlobResult<String> {
        let mut state = self.state();
        state.record_call(StoreOperation::CreateMultipartUpload)?;
        let upload_id = format!("upload-{}", state.next_id());
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: HashMap::new(),
            },
        );
        debug!(key, upload_id = %upload_id, "created in-memory multipart upload");
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BlobResult<String> {
        let mut state = self.state();
        state.record_call(StoreOperation::UploadPart)?;
        if part_number == 0 {
            return Err(BlobError::multipart("part numbers start from 1"));
        }
        let tag = format!("\"{}-{}\"", upload_id, part_number);
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| BlobError::multipart(format!("no such upload {}", upload_id)))?;
        upload.parts.insert(part_number, (tag.clone(), data));
        Ok(tag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BlobResult<()> {
        let mut state = self.state();
        state.record_call(StoreOperation::CompleteMultipartUpload)?;
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| BlobError::multipart(format!("no such upload {}", upload_id)))?;

        let mut body = BytesMut::new();
        for part in &parts {
            match upload.parts.get(&part.part_number) {
                Some((tag, data)) if *tag == part.tag => body.extend_from_slice(data),
                _ => {
                    return Err(BlobError::multipart(format!(
                        "invalid part {} for upload {}",
                        part.part_number, upload_id
                    )))
                }
            }
        }

        state.uploads.remove(upload_id);
        Self::store_object(&mut state, key, body.freeze(), PutObjectOptions::default());
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BlobResult<()> {
        let mut state = self.state();
        state.record_call(StoreOperation::AbortMultipartUpload)?;
        let known = state
            .uploads
            .get(upload_id)
            .map(|u| u.key == key)
            .unwrap_or(false);
        if !known {
            return Err(BlobError::multipart(format!("no such upload {}", upload_id)));
        }
        state.uploads.remove(upload_id);
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        format!("memory:///{}", key)
    }
}
