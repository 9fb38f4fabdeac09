use async_trait::async_trait;

use crate::models::{Request, Response};

use super::FetchError;

/// Performs one network request on behalf of the cache manager.
///
/// An `Ok` response may carry any status; only transport-level failures
/// are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
