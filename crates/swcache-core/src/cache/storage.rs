use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Response;

use super::CachedData;

/// One named bucket of cached responses.
#[async_trait]
pub trait CacheBucket: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CachedData<Response>>>;

    /// Last write wins for concurrent puts to the same key.
    async fn put(&self, key: &str, response: Response) -> Result<()>;

    /// Store a batch of entries. Implementations that can persist the batch
    /// in one step should override this.
    async fn put_all(&self, entries: Vec<(String, Response)>) -> Result<()> {
        for (key, response) in entries {
            self.put(&key, response).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>>;
}

/// The set of buckets for one origin.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a bucket, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>>;

    /// Bucket names in creation order.
    async fn list(&self) -> Result<Vec<String>>;

    /// Delete a bucket. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.list().await?.iter().any(|n| n == name))
    }
}
