//! swcache core library.
//!
//! Versioned offline cache for a static site: precaches a manifest on
//! install, evicts superseded buckets on activate and answers page requests
//! cache-first with a network fallback.
//!
//! The host runtime (page registration, event delivery) is modelled by
//! [`worker::Registration`]; storage and network are injected through the
//! [`cache::CacheStorage`] and [`network::Fetcher`] traits.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod network;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use reqwest::Url;
pub use error::{CacheError, Result};
pub use models::{ClientMessage, Manifest, Request, Response, ResponseOrigin};
pub use worker::{CacheManager, Registration, WorkerState};
