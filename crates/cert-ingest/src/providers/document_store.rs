//! Object storage provider trait for uploaded documents

use async_trait::async_trait;

use crate::error::Result;

/// Trait for document object storage
///
/// Uploads are idempotent on `{bucket, key}`: storing the same key twice
/// overwrites in place and never creates a second object.
#[async_trait]
pub trait DocumentStoreProvider: Send + Sync {
    /// Upload an object
    ///
    /// Returns the storage URI
    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<String>;

    /// Check if an object exists
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
