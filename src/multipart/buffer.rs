//! Byte accumulation for the part currently being assembled.

use bytes::{Bytes, BytesMut};

/// Accumulates chunk payloads of one upload session until they are flushed
/// as a part.
///
/// The buffer belongs to exactly one session, so the session key is implied
/// by ownership.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    data: BytesMut,

    /// Offset declared by the last call that appended to the buffer.
    last_offset: Option<u64>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return the buffered length.
    pub fn append(&mut self, offset: u64, bytes: &[u8]) -> usize {
        self.data.extend_from_slice(bytes);
        self.last_offset = Some(offset);
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn last_offset(&self) -> Option<u64> {
        self.last_offset
    }

    /// Whether the buffer may be uploaded as a non-final part.
    pub fn is_flushable(&self, min_part_size: usize) -> bool {
        self.data.len() >= min_part_size
    }

    /// Return the buffered bytes and reset the buffer.
    pub fn drain(&mut self) -> Bytes {
        self.last_offset = None;
        self.data.split().freeze()
    }
}
