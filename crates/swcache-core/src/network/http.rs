//! reqwest-backed fetcher for the live site.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use crate::models::{Request, Response, ResponseOrigin};

use super::{FetchError, Fetcher};

/// HTTP fetcher bound to one site origin.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    /// Create a fetcher. `timeout` is off by default: a request that never
    /// resolves stays pending.
    pub fn new(origin: Url, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            origin,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if !request.is_navigable() {
            return Err(FetchError::UnsupportedScheme(
                request.url().scheme().to_string(),
            ));
        }

        let response = self.client.get(request.url().clone()).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let origin = ResponseOrigin::classify(&final_url, &self.origin);

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                FetchError::InvalidResponse(format!("unreadable body from {}: {}", final_url, e))
            })?
            .to_vec();

        debug!(url = %final_url, status, bytes = body.len(), "Fetched from network");

        Ok(Response {
            url: final_url.to_string(),
            status,
            headers,
            body,
            origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer a single connection with `reply` verbatim, then hang up.
    async fn serve_once(reply: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(reply.as_bytes()).await;
        });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_same_origin() {
        let origin =
            serve_once("HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 6\r\n\r\nbody{}")
                .await;
        let fetcher = HttpFetcher::new(origin.clone(), None).unwrap();

        let response = fetcher
            .fetch(&Request::new("/a.css", &origin).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"body{}");
        assert_eq!(response.header("Content-Type"), Some("text/css"));
        assert_eq!(response.origin, ResponseOrigin::SameOrigin);
    }

    #[tokio::test]
    async fn test_truncated_body_is_invalid_response() {
        let origin = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort").await;
        let fetcher = HttpFetcher::new(origin.clone(), None).unwrap();

        let err = fetcher
            .fetch(&Request::new("/", &origin).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_non_http_scheme_rejected() {
        let origin = Url::parse("https://plang.example").unwrap();
        let fetcher = HttpFetcher::new(origin.clone(), None).unwrap();

        let err = fetcher
            .fetch(&Request::new("data:text/plain,hi", &origin).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme(ref s) if s == "data"));
    }
}
