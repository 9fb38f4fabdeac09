//! Network access for cache misses and precaching.
//!
//! `Fetcher` is the injected capability; `HttpFetcher` talks to the real
//! origin through reqwest, `MemoryFetcher` serves a fixed site map and can
//! simulate going offline.

pub mod error;
pub mod fetcher;
pub mod http;
pub mod memory;

pub use error::FetchError;
pub use fetcher::Fetcher;
pub use http::HttpFetcher;
pub use memory::MemoryFetcher;
