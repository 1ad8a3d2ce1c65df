//! Output bindings that store blobs in S3 or Azure Blob Storage.
//!
//! Besides whole-object operations, a binding accepts a blob as a stream of
//! hex-encoded chunks (`put`), each tagged with its byte offset, and commits
//! them as one object on `putblocklist`. See [`multipart`] for how chunks
//! become store parts.

pub mod binding;
pub mod config;
pub mod error;
pub mod metrics;
pub mod multipart;
pub mod request;

#[cfg(test)]
mod integration_test;
#[cfg(test)]
mod testing;

pub use binding::{BindingOptions, OutputBinding, StorageBinding};
pub use config::{AzureMetadata, BindingKind, ComponentConfig, S3Metadata};
pub use error::{BindingError, Result};
pub use request::{InvokeRequest, InvokeResponse, OperationKind};
