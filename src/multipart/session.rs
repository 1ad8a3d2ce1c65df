//! State of one in-progress multipart upload.

use std::collections::HashSet;

use blob_store::CompletedPart;
use bytes::Bytes;

use super::buffer::ChunkBuffer;

/// A part that was accepted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: u32,
    pub tag: String,

    /// Client-declared offset, used only to order parts on commit.
    pub offset: u64,
    pub size_bytes: u64,
}

/// A drained buffer waiting to be uploaded under a reserved part number.
#[derive(Debug)]
pub struct PendingPart {
    pub part_number: u32,
    pub offset: u64,
    pub data: Bytes,
}

#[derive(Debug)]
pub struct UploadSession {
    key: String,
    upload_id: String,
    next_part_number: u32,
    parts: Vec<UploadedPart>,
    buffer: ChunkBuffer,
    offsets: HashSet<u64>,
}

impl UploadSession {
    pub fn new(key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            upload_id: upload_id.into(),
            next_part_number: 1,
            parts: Vec::new(),
            buffer: ChunkBuffer::new(),
            offsets: HashSet::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn parts(&self) -> &[UploadedPart] {
        &self.parts
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_offset(&self, offset: u64) -> bool {
        self.offsets.contains(&offset)
    }

    /// Buffer a chunk and return the buffered length.
    pub fn append(&mut self, offset: u64, chunk: &[u8]) -> usize {
        self.offsets.insert(offset);
        self.buffer.append(offset, chunk)
    }

    /// Drain the buffer into a part tagged with `offset` if it reached
    /// `min_part_size`.
    pub fn take_full_part(&mut self, offset: u64, min_part_size: usize) -> Option<PendingPart> {
        if !self.buffer.is_flushable(min_part_size) {
            return None;
        }
        Some(self.reserve_part(offset))
    }

    /// Drain whatever is left into the last part of the upload.
    ///
    /// A session without parts always yields one, possibly empty, so the
    /// commit is never empty.
    pub fn take_final_part(&mut self) -> Option<PendingPart> {
        if self.buffer.is_empty() && !self.parts.is_empty() {
            return None;
        }
        let offset = self.buffer.last_offset().unwrap_or_default();
        Some(self.reserve_part(offset))
    }

    fn reserve_part(&mut self, offset: u64) -> PendingPart {
        let part_number = self.next_part_number;
        self.next_part_number += 1;
        PendingPart {
            part_number,
            offset,
            data: self.buffer.drain(),
        }
    }

    pub fn record_part(&mut self, part: &PendingPart, tag: String) {
        debug_assert!(self.parts.iter().all(|p| p.part_number != part.part_number));
        self.parts.push(UploadedPart {
            part_number: part.part_number,
            tag,
            offset: part.offset,
            size_bytes: part.data.len() as u64,
        });
    }

    pub fn size_bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.size_bytes).sum::<u64>() + self.buffer.len() as u64
    }

    /// Parts ordered by declared offset, ready to be committed.
    ///
    /// Offsets are unique within a session, the sort key never ties.
    pub fn parts_in_content_order(&self) -> Vec<CompletedPart> {
        let mut parts = self.parts.clone();
        parts.sort_by_key(|p| p.offset);
        parts
            .into_iter()
            .map(|p| CompletedPart {
                part_number: p.part_number,
                tag: p.tag,
                size_bytes: p.size_bytes,
            })
            .collect()
    }
}
