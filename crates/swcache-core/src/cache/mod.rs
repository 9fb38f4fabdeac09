//! Cache storage for versioned buckets.
//!
//! This module provides the injected storage capability the cache manager
//! works against:
//! - `CacheStorage`: open, list and delete named buckets
//! - `CacheBucket`: get and put responses by normalized key
//!
//! Two implementations are provided: `MemoryStorage` for tests and dry runs,
//! and `DiskStorage`, which persists each bucket as a JSON file.

pub mod disk;
pub mod entry;
pub mod key;
pub mod memory;
pub mod storage;

pub use disk::DiskStorage;
pub use entry::CachedData;
pub use key::cache_key;
pub use memory::MemoryStorage;
pub use storage::{CacheBucket, CacheStorage};
