use std::sync::Arc;

use blob_store::{BlobError, ObjectStoreAdapter};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::session::{PendingPart, UploadSession};
use crate::{
    error::{BindingError, Result},
    request::OperationKind,
};

/// Smallest part the stores accept, except for the last part of an upload.
pub const DEFAULT_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// An empty slot means no session is active for the key.
type SessionSlot = Arc<Mutex<Option<UploadSession>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The chunk was buffered without store I/O.
    Buffered { buffered_bytes: usize },

    /// The buffer crossed the threshold and was uploaded as a part.
    Flushed { part_number: u32, size_bytes: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteOutcome {
    pub parts: usize,
    pub size_bytes: u64,
}

/// Owns every in-progress multipart upload of a binding.
///
/// Calls for the same key are serialized on that key's slot; calls for
/// different keys run concurrently. A session is taken out of its slot while
/// an operation runs and put back only when the operation succeeded, so a
/// failed store call always leaves the key without a session.
pub struct MultipartSessionManager {
    store: Arc<dyn ObjectStoreAdapter>,
    min_part_size: usize,
    sessions: DashMap<String, SessionSlot>,
}

impl MultipartSessionManager {
    pub fn new(store: Arc<dyn ObjectStoreAdapter>) -> Self {
        Self::with_min_part_size(store, DEFAULT_MIN_PART_SIZE)
    }

    pub fn with_min_part_size(store: Arc<dyn ObjectStoreAdapter>, min_part_size: usize) -> Self {
        Self {
            store,
            min_part_size,
            sessions: DashMap::new(),
        }
    }

    pub fn min_part_size(&self) -> usize {
        self.min_part_size
    }

    /// Buffer one chunk of `key`, starting an upload if none is active.
    pub async fn put(&self, key: &str, offset: u64, chunk: Bytes) -> Result<PutOutcome> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        if guard.as_ref().is_some_and(|s| s.has_offset(offset)) {
            return Err(BindingError::DuplicateOffset {
                key: key.to_string(),
                offset,
            });
        }

        let mut session = match guard.take() {
            Some(session) => session,
            None => match self.begin(key).await {
                Ok(session) => session,
                Err(e) => {
                    self.release(key, &slot);
                    return Err(e);
                }
            },
        };

        let buffered_bytes = session.append(offset, &chunk);
        let Some(part) = session.take_full_part(offset, self.min_part_size) else {
            debug!(blob_key = %key, offset, buffered_bytes, "buffered chunk");
            *guard = Some(session);
            return Ok(PutOutcome::Buffered { buffered_bytes });
        };

        match self.upload(&mut session, &part).await {
            Ok(()) => {
                *guard = Some(session);
                Ok(PutOutcome::Flushed {
                    part_number: part.part_number,
                    size_bytes: part.data.len() as u64,
                })
            }
            Err(e) => {
                self.abandon(&session, &e).await;
                self.release(key, &slot);
                Err(BindingError::store(OperationKind::Put, key, e))
            }
        }
    }

    /// Flush the remaining buffer and commit the parts of `key` in offset
    /// order.
    pub async fn complete(&self, key: &str) -> Result<CompleteOutcome> {
        let no_session = || BindingError::NoActiveSession {
            key: key.to_string(),
        };
        let slot = self.existing_slot(key).ok_or_else(no_session)?;
        let mut guard = slot.lock().await;
        let Some(mut session) = guard.take() else {
            self.release(key, &slot);
            return Err(no_session());
        };

        let result = self.commit(&mut session).await;
        if let Err(e) = &result {
            self.abandon(&session, e).await;
        }
        // Committed or abandoned, the session is gone either way.
        self.release(key, &slot);
        drop(guard);

        let outcome =
            result.map_err(|e| BindingError::store(OperationKind::PutBlockList, key, e))?;
        info!(
            blob_key = %key,
            upload_id = %session.upload_id(),
            parts = outcome.parts,
            size_bytes = outcome.size_bytes,
            "completed multipart upload"
        );
        Ok(outcome)
    }

    /// Cancel the upload of `key`. Returns false when none was active.
    pub async fn abort(&self, key: &str) -> Result<bool> {
        let Some(slot) = self.existing_slot(key) else {
            return Ok(false);
        };
        let mut guard = slot.lock().await;
        let Some(session) = guard.take() else {
            self.release(key, &slot);
            return Ok(false);
        };

        warn!(blob_key = %key, upload_id = %session.upload_id(), "aborting multipart upload");
        let result = self
            .store
            .abort_multipart_upload(key, session.upload_id())
            .await;
        self.release(key, &slot);
        drop(guard);

        result.map_err(|e| BindingError::store(OperationKind::Abort, key, e))?;
        Ok(true)
    }

    pub async fn is_active(&self, key: &str) -> bool {
        let Some(slot) = self.existing_slot(key) else {
            return false;
        };
        let guard = slot.lock().await;
        guard.is_some()
    }

    /// Number of keys with a slot in the session table.
    pub fn tracked_keys(&self) -> usize {
        self.sessions.len()
    }

    async fn begin(&self, key: &str) -> Result<UploadSession> {
        let upload_id = self
            .store
            .create_multipart_upload(key)
            .await
            .map_err(|e| BindingError::store(OperationKind::Put, key, e))?;
        info!(blob_key = %key, upload_id = %upload_id, "started multipart upload");
        Ok(UploadSession::new(key, upload_id))
    }

    async fn upload(
        &self,
        session: &mut UploadSession,
        part: &PendingPart,
    ) -> Result<(), BlobError> {
        debug!(
            blob_key = %session.key(),
            upload_id = %session.upload_id(),
            part_number = part.part_number,
            offset = part.offset,
            size_bytes = part.data.len(),
            "uploading part"
        );
        let tag = self
            .store
            .upload_part(
                session.key(),
                session.upload_id(),
                part.part_number,
                part.data.clone(),
            )
            .await?;
        session.record_part(part, tag);
        Ok(())
    }

    async fn commit(&self, session: &mut UploadSession) -> Result<CompleteOutcome, BlobError> {
        if let Some(part) = session.take_final_part() {
            self.upload(session, &part).await?;
        }
        let parts = session.parts_in_content_order();
        let outcome = CompleteOutcome {
            parts: parts.len(),
            size_bytes: session.size_bytes(),
        };
        self.store
            .complete_multipart_upload(session.key(), session.upload_id(), parts)
            .await?;
        Ok(outcome)
    }

    /// Best-effort abort of a session whose upload failed.
    async fn abandon(&self, session: &UploadSession, cause: &BlobError) {
        warn!(
            blob_key = %session.key(),
            upload_id = %session.upload_id(),
            error = %cause,
            "aborting multipart upload after failure"
        );
        if let Err(e) = self
            .store
            .abort_multipart_upload(session.key(), session.upload_id())
            .await
        {
            error!(
                blob_key = %session.key(),
                upload_id = %session.upload_id(),
                error = %e,
                "failed to abort multipart upload"
            );
        }
    }

    fn slot(&self, key: &str) -> SessionSlot {
        Arc::clone(&self.sessions.entry(key.to_string()).or_default())
    }

    fn existing_slot(&self, key: &str) -> Option<SessionSlot> {
        self.sessions.get(key).map(|slot| Arc::clone(slot.value()))
    }

    /// Drop the table entry of an emptied slot unless another caller is
    /// already waiting on it. Must be called while the slot is locked.
    fn release(&self, key: &str, slot: &SessionSlot) {
        self.sessions.remove_if(key, |_, current| {
            Arc::ptr_eq(current, slot) && Arc::strong_count(current) == 2
        });
    }
}
