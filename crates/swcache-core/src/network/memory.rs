//! In-memory fetcher serving a fixed site map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::RwLock;

use crate::models::{Request, Response, ResponseOrigin};

use super::{FetchError, Fetcher};

/// Serves registered routes by full URL (query included), 404 for anything
/// else on the origin. Counts every call so tests can assert that cache hits
/// never touch the network.
pub struct MemoryFetcher {
    origin: Url,
    routes: RwLock<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            routes: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Serve `body` with status 200 at a root-relative `path`.
    pub async fn serve(&self, path: &str, body: impl Into<Vec<u8>>) {
        let url = self.resolve(path);
        let response = Response::new(url.clone(), 200, ResponseOrigin::SameOrigin).with_body(body);
        self.routes.write().await.insert(url, response);
    }

    /// Serve an exact response for `target`, which may be absolute.
    pub async fn serve_response(&self, target: &str, response: Response) {
        let url = self.resolve(target);
        self.routes.write().await.insert(url, response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn resolve(&self, target: &str) -> String {
        self.origin
            .join(target)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| target.to_string())
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Offline(request.url().to_string()));
        }

        let url = request.url().to_string();
        if let Some(response) = self.routes.read().await.get(&url) {
            return Ok(response.clone());
        }
        let origin = ResponseOrigin::classify(request.url(), &self.origin);
        Ok(Response::new(url, 404, origin))
    }
}
