//! Error types for the cache manager.

use thiserror::Error;

use crate::network::FetchError;
use crate::worker::WorkerState;

#[derive(Error, Debug)]
pub enum CacheError {
    /// A manifest entry could not be retrieved during install.
    #[error("Precache of {path} failed: {reason}")]
    PrecacheFetchFailure { path: String, reason: String },

    /// A network response could not be persisted.
    #[error("Cache write for {key} failed: {reason}")]
    CacheWriteFailure { key: String, reason: String },

    /// A stale bucket could not be removed during activation.
    #[error("Deleting cache bucket {bucket} failed: {reason}")]
    CacheDeletionFailure { bucket: String, reason: String },

    #[error("Fetch of {url} failed: {source}")]
    NetworkFailure {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Cache manager {version} is {actual}, expected {expected}")]
    InvalidState {
        version: String,
        expected: WorkerState,
        actual: WorkerState,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
