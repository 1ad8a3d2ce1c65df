//! Object store adapters for the storage bindings.
//!
//! This crate hides the differences between the supported object stores
//! behind one [`ObjectStoreAdapter`] trait. It supports:
//!
//! - S3 (and S3-compatible endpoints) and Azure Blob Storage
//! - Whole-object put, get, head, delete and segmented listing
//! - Range requests
//! - Multipart uploads committed in caller-defined content order
//!
//! # Architecture
//!
//! Data I/O goes through `object_store`. Where it can't express what the
//! stores offer, the native SDKs fill in: `aws-sdk-s3` drives the S3 multipart
//! protocol and `azure_storage_blobs` provisions containers.
//!
//! Adapters are stateless with respect to multipart uploads; callers keep the
//! upload id and the list of [`CompletedPart`]s and hand them back on
//! completion.
//!
//! # Usage
//!
//! ```rust,no_run
//! use blob_store::{CompletedPart, MemoryStore, ObjectStoreAdapter};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), blob_store::BlobError> {
//! let store = MemoryStore::new();
//! let upload_id = store.create_multipart_upload("video.mp4").await?;
//! let tag = store
//!     .upload_part("video.mp4", &upload_id, 1, Bytes::from_static(b"frames"))
//!     .await?;
//! store
//!     .complete_multipart_upload(
//!         "video.mp4",
//!         &upload_id,
//!         vec![CompletedPart { part_number: 1, tag, size_bytes: 6 }],
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod backends;
mod error;
mod listing;
mod metadata;
mod multipart;
mod traits;

#[cfg(feature = "azure")]
pub use backends::azure::{AzureStore, AzureStoreConfig, ContainerAccess, DEFAULT_MAX_RETRIES};
// Re-export backend types for direct usage
pub use backends::memory::{MemoryStore, StoreOperation};
#[cfg(feature = "aws")]
pub use backends::s3::{S3Store, S3StoreConfig, S3_MIN_PART_SIZE};
pub use error::{BlobError, BlobResult};
pub use listing::{ListInclude, ListPage, ListRequest, ListedBlob, MAX_PAGE_SIZE};
pub use metadata::{BlobMetadata, DeleteObjectOptions, DeleteSnapshots, PutObjectOptions};
pub use multipart::{in_part_number_order, CompletedPart};
pub use traits::ObjectStoreAdapter;
