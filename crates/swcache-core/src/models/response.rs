use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::Request;

/// Where a response came from, as far as caching is concerned.
///
/// Same-origin responses are fully readable and may be cached. Cross-origin
/// responses are treated as opaque. `Error` marks a synthetic network error
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrigin {
    SameOrigin,
    CrossOriginOpaque,
    Error,
}

impl ResponseOrigin {
    /// Classify a response by the origin of the URL it was finally served from.
    pub fn classify(response_url: &Url, origin: &Url) -> Self {
        if response_url.origin() == origin.origin() {
            ResponseOrigin::SameOrigin
        } else {
            ResponseOrigin::CrossOriginOpaque
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_base64", default)]
    pub body: Vec<u8>,
    pub origin: ResponseOrigin,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16, origin: ResponseOrigin) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
            body: Vec::new(),
            origin,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 2xx status.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether a network response to `request` may be written to the cache:
    /// exactly 200, readable same-origin body, same-origin request.
    pub fn is_storable(&self, request: &Request) -> bool {
        self.status == 200
            && self.origin == ResponseOrigin::SameOrigin
            && request.is_same_origin()
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://plang.example").unwrap()
    }

    fn same_origin_request() -> Request {
        Request::new("/releases", &origin()).unwrap()
    }

    #[test]
    fn test_classify_same_and_cross_origin() {
        let same = Url::parse("https://plang.example/a.css").unwrap();
        let cross = Url::parse("https://cdn.example/a.css").unwrap();
        assert_eq!(ResponseOrigin::classify(&same, &origin()), ResponseOrigin::SameOrigin);
        assert_eq!(
            ResponseOrigin::classify(&cross, &origin()),
            ResponseOrigin::CrossOriginOpaque
        );
    }

    #[test]
    fn test_storable_requires_200_same_origin() {
        let req = same_origin_request();
        let ok = Response::new("https://plang.example/releases", 200, ResponseOrigin::SameOrigin);
        assert!(ok.is_storable(&req));

        let not_found = Response::new("https://plang.example/releases", 404, ResponseOrigin::SameOrigin);
        assert!(!not_found.is_storable(&req));

        // 2xx other than 200 is still not cached
        let no_content = Response::new("https://plang.example/releases", 204, ResponseOrigin::SameOrigin);
        assert!(no_content.is_ok());
        assert!(!no_content.is_storable(&req));

        let opaque = Response::new("https://cdn.example/x", 200, ResponseOrigin::CrossOriginOpaque);
        assert!(!opaque.is_storable(&req));

        let failed = Response::new("", 0, ResponseOrigin::Error);
        assert!(!failed.is_storable(&req));
    }

    #[test]
    fn test_storable_rejects_cross_origin_request() {
        let req = Request::new("https://cdn.example/x.js", &origin()).unwrap();
        let resp = Response::new("https://cdn.example/x.js", 200, ResponseOrigin::SameOrigin);
        assert!(!resp.is_storable(&req));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let resp = Response::new("https://plang.example/", 200, ResponseOrigin::SameOrigin)
            .with_header("Content-Type", "text/html");
        assert_eq!(resp.header("content-type"), Some("text/html"));
        assert_eq!(resp.header("etag"), None);
    }

    #[test]
    fn test_body_serializes_as_base64() {
        let resp = Response::new("https://plang.example/", 200, ResponseOrigin::SameOrigin)
            .with_body(b"<html>".to_vec());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["body"], "PGh0bWw+");
        assert_eq!(json["origin"], "same_origin");

        let back: Response = serde_json::from_value(json).unwrap();
        assert_eq!(back, resp);
    }
}
