//! File-backed cache storage.
//!
//! Layout under the storage root:
//! - `index.json`: bucket names in creation order
//! - `<hex(name)>.json`: one file per bucket holding all of its entries
//!
//! Bucket files are rewritten whole on every put, through a temp file and a
//! rename so a crash never leaves a torn bucket behind.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::models::Response;

use super::{CacheBucket, CacheStorage, CachedData};

const INDEX_FILE: &str = "index.json";

type Entries = BTreeMap<String, CachedData<Response>>;

#[derive(Debug, Serialize, Deserialize)]
struct BucketFile {
    name: String,
    entries: Entries,
}

pub struct DiskStorage {
    root: PathBuf,
    index: Mutex<Vec<String>>,
    open: Mutex<HashMap<String, Arc<DiskBucket>>>,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let contents = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&contents)?
        } else {
            Vec::new()
        };
        Ok(Self {
            root,
            index: Mutex::new(index),
            open: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        let mut file = String::with_capacity(name.len() * 2 + 5);
        for byte in name.bytes() {
            let _ = write!(file, "{:02x}", byte);
        }
        file.push_str(".json");
        self.root.join(file)
    }

    async fn save_index(&self, index: &[String]) -> Result<()> {
        let contents = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.root.join(INDEX_FILE), &contents).await
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>> {
        let mut index = self.index.lock().await;
        if !index.iter().any(|n| n == name) {
            index.push(name.to_string());
            self.save_index(&index).await?;
            debug!(bucket = name, "Created cache bucket");
        }

        let mut open = self.open.lock().await;
        if let Some(bucket) = open.get(name) {
            return Ok(bucket.clone());
        }
        let bucket = Arc::new(DiskBucket::load(name, self.bucket_path(name)).await?);
        open.insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.index.lock().await.clone())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut index = self.index.lock().await;
        let Some(pos) = index.iter().position(|n| n == name) else {
            return Ok(false);
        };

        let path = self.bucket_path(name);
        if let Some(bucket) = self.open.lock().await.remove(name) {
            // Wait out any in-flight write so it cannot recreate the file
            let _entries = bucket.entries.lock().await;
            bucket.deleted.store(true, Ordering::SeqCst);
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        index.remove(pos);
        self.save_index(&index).await?;
        Ok(true)
    }
}

pub struct DiskBucket {
    name: String,
    path: PathBuf,
    entries: Mutex<Entries>,
    deleted: AtomicBool,
}

impl DiskBucket {
    async fn load(name: &str, path: PathBuf) -> Result<Self> {
        let entries = match tokio::fs::read(&path).await {
            Ok(contents) => {
                let file: BucketFile = serde_json::from_slice(&contents)?;
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            name: name.to_string(),
            path,
            entries: Mutex::new(entries),
            deleted: AtomicBool::new(false),
        })
    }

    async fn persist(&self, entries: &Entries) -> Result<()> {
        let file = BucketFile {
            name: self.name.clone(),
            entries: entries.clone(),
        };
        let contents = serde_json::to_vec(&file)?;
        write_atomic(&self.path, &contents).await
    }

    fn check_live(&self) -> Result<()> {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(CacheError::Storage(format!("Bucket {} was deleted", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBucket for DiskBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CachedData<Response>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, response: Response) -> Result<()> {
        self.put_all(vec![(key.to_string(), response)]).await
    }

    async fn put_all(&self, batch: Vec<(String, Response)>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        self.check_live()?;
        let mut updated = entries.clone();
        for (key, response) in batch {
            updated.insert(key, CachedData::new(response));
        }
        // Only publish the new entries once they are on disk
        self.persist(&updated).await?;
        *entries = updated;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
