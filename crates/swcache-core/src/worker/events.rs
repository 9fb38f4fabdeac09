//! Typed payloads for the events a host runtime delivers to a manager.

use crate::error::CacheError;
use crate::models::{ClientMessage, Request, Response};

#[derive(Debug, Clone)]
pub enum Event {
    Install,
    Activate,
    Fetch(Request),
    Message(ClientMessage),
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed,
    Activated(ActivationReport),
    Responded(FetchOutcome),
    MessageHandled { skip_waiting: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// Non-http(s) request forwarded without touching the cache.
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: Response,
    pub source: ResponseSource,
}

/// What activation did to stale buckets.
#[derive(Debug, Default)]
pub struct ActivationReport {
    pub deleted: Vec<String>,
    /// `CacheDeletionFailure` per bucket that could not be removed.
    pub failed: Vec<CacheError>,
}

impl ActivationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
