//! Object-store abstraction used by the log core.
//!
//! Every operation is independent and may be called concurrently. Dropping
//! a returned future cancels whatever requests it still has in flight.

use crate::s3::S3BackendError;
use crate::upload::UploadOptions;
use async_trait::async_trait;
use bytes::Bytes;
use prometheus::core::Collector;

/// Trait for object-store backends
#[async_trait]
pub trait Backend: Send + Sync {
    /// Store `data` at `key`
    async fn upload(
        &self,
        key: &str,
        data: Bytes,
        opts: &UploadOptions,
    ) -> Result<(), S3BackendError>;

    /// Read the object at `key`, decompressed if it was stored compressed
    async fn fetch(&self, key: &str) -> Result<Bytes, S3BackendError>;

    /// Keys starting with `prefix`, in a single page
    async fn list(&self, prefix: &str) -> Result<Vec<String>, S3BackendError>;

    /// Server-side copy of `from` to `to`
    async fn copy(&self, from: &str, to: &str) -> Result<(), S3BackendError>;

    async fn delete(&self, key: &str) -> Result<(), S3BackendError>;

    /// Collectors to register with the process metrics registry
    fn metrics(&self) -> Vec<Box<dyn Collector>>;
}
