use reqwest::Url;

use crate::error::{CacheError, Result};

/// A page request intercepted by the cache manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    url: Url,
    same_origin: bool,
}

impl Request {
    /// Build a request for `target`, resolving root-relative paths against
    /// `origin`.
    pub fn new(target: &str, origin: &Url) -> Result<Self> {
        let url = origin.join(target).map_err(|e| CacheError::InvalidUrl {
            url: target.to_string(),
            reason: e.to_string(),
        })?;
        let same_origin = url.origin() == origin.origin();
        Ok(Self { url, same_origin })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_same_origin(&self) -> bool {
        self.same_origin
    }

    /// Only http(s) requests go through the cache policy.
    pub fn is_navigable(&self) -> bool {
        matches!(self.url.scheme(), "http" | "https")
    }

    /// Path component only, query and fragment dropped.
    pub fn path(&self) -> &str {
        self.url.path()
    }
}
