//! Chunked uploads assembled into store multipart uploads.
//!
//! Clients stream a blob as chunks tagged with the byte offset they belong
//! at. Chunks are buffered per blob until the buffer holds at least a minimum
//! part size, then uploaded as one part. Completing the upload flushes the
//! remainder and commits all parts ordered by offset, regardless of the order
//! the chunks arrived in.

mod buffer;
mod manager;
mod session;

pub use buffer::ChunkBuffer;
pub use manager::{CompleteOutcome, MultipartSessionManager, PutOutcome, DEFAULT_MIN_PART_SIZE};
pub use session::{PendingPart, UploadSession, UploadedPart};
