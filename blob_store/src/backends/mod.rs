//! Object store backend implementations.

pub mod memory;

#[cfg(feature = "aws")]
pub mod s3;

#[cfg(feature = "azure")]
pub mod azure;
