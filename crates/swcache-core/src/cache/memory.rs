//! In-memory cache storage with fault injection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CacheError, Result};
use crate::models::Response;

use super::{CacheBucket, CacheStorage, CachedData};

#[derive(Debug, Default)]
struct Faults {
    deletes: HashSet<String>,
    writes: HashSet<String>,
    list: bool,
}

/// Process-local storage. Buckets vanish with the process.
#[derive(Default)]
pub struct MemoryStorage {
    buckets: RwLock<Vec<Arc<MemoryBucket>>>,
    faults: Arc<RwLock<Faults>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `delete` of `bucket` fail.
    pub async fn inject_delete_failure(&self, bucket: impl Into<String>) {
        self.faults.write().await.deletes.insert(bucket.into());
    }

    /// Make every later write into `bucket` fail.
    pub async fn inject_write_failure(&self, bucket: impl Into<String>) {
        self.faults.write().await.writes.insert(bucket.into());
    }

    /// Make every later `list` (and so `has`) fail.
    pub async fn inject_list_failure(&self) {
        self.faults.write().await.list = true;
    }

    pub async fn clear_failures(&self) {
        let mut faults = self.faults.write().await;
        faults.deletes.clear();
        faults.writes.clear();
        faults.list = false;
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>> {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket) = buckets.iter().find(|b| b.name == name) {
            return Ok(bucket.clone());
        }
        let bucket = Arc::new(MemoryBucket {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            deleted: AtomicBool::new(false),
            faults: self.faults.clone(),
        });
        buckets.push(bucket.clone());
        Ok(bucket)
    }

    async fn list(&self) -> Result<Vec<String>> {
        if self.faults.read().await.list {
            return Err(CacheError::Storage("Injected list failure".to_string()));
        }
        Ok(self.buckets.read().await.iter().map(|b| b.name.clone()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        if self.faults.read().await.deletes.contains(name) {
            return Err(CacheError::Storage(format!(
                "Injected delete failure for bucket: {}",
                name
            )));
        }
        let mut buckets = self.buckets.write().await;
        match buckets.iter().position(|b| b.name == name) {
            Some(idx) => {
                let bucket = buckets.remove(idx);
                bucket.deleted.store(true, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub struct MemoryBucket {
    name: String,
    entries: RwLock<HashMap<String, CachedData<Response>>>,
    deleted: AtomicBool,
    faults: Arc<RwLock<Faults>>,
}

#[async_trait]
impl CacheBucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CachedData<Response>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, response: Response) -> Result<()> {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(CacheError::Storage(format!("Bucket {} was deleted", self.name)));
        }
        if self.faults.read().await.writes.contains(&self.name) {
            return Err(CacheError::Storage(format!(
                "Injected write failure for bucket: {}",
                self.name
            )));
        }
        self.entries
            .write()
            .await
            .insert(key.to_string(), CachedData::new(response));
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
