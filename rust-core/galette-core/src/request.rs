//! # HTTP Request
//!
//! Transport-neutral request wrapper.
//!
//! ## Design Principles
//!
//! - Request only handles request data, not response
//! - Immutable once handed to the dispatcher; negotiation derives a separate
//!   view instead of rewriting it
//! - Does not expose hyper types beyond the header map

use crate::dispatcher::Method;
use crate::error::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::HeaderMap;
use std::collections::HashMap;
use std::time::Instant;

/// HTTP request as seen by the dispatcher
///
/// - Headers are stored but accessed on-demand
/// - Body is collected once
/// - Query string is parsed at construction
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    /// Raw query string (e.g., "page=1&limit=10")
    query_string: Option<String>,
    /// Parsed query parameters
    query_params: HashMap<String, String>,
    /// Request headers
    headers: HeaderMap,
    /// Request body (collected)
    body: Option<Bytes>,
    /// When the request entered the stack
    received_at: Instant,
}

impl Request {
    /// Create a request manually (for testing/internal use)
    ///
    /// `path` may carry a query string (`/users?page=2`).
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query_string) = if let Some((p, q)) = path.split_once('?') {
            (p.to_string(), Some(q.to_string()))
        } else {
            (path, None)
        };

        let query_params = parse_query_string(query_string.as_deref());

        Self {
            method,
            path,
            query_string,
            query_params,
            headers: HeaderMap::new(),
            body: None,
            received_at: Instant::now(),
        }
    }

    /// Add a header (builder style); invalid names or values are ignored
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Attach a body (builder style)
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Create from hyper request with body size limit
    ///
    /// Returns `None` for the method when hyper reports one the router
    /// does not support; callers answer those with 501.
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` when the declared or actual body
    /// exceeds `max_body_size`, and `Error::Http` when the body cannot be
    /// read to the end.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Option<Self>> {
        let Some(method) = Method::from_hyper(req.method()) else {
            return Ok(None);
        };

        let uri = req.uri();
        let path = uri.path().to_string();
        let query_string = uri.query().map(String::from);

        let query_params = parse_query_string(query_string.as_deref());

        let headers = req.headers().clone();
        if let Some(len) = headers.get(hyper::header::CONTENT_LENGTH) {
            if let Ok(len_str) = len.to_str() {
                if let Ok(content_len) = len_str.parse::<usize>() {
                    if content_len > max_body_size {
                        return Err(crate::error::Error::PayloadTooLarge {
                            limit: max_body_size,
                            actual: content_len,
                        });
                    }
                }
            }
        }

        let bytes = BodyExt::collect(req.into_body()).await?.to_bytes();
        if bytes.len() > max_body_size {
            return Err(crate::error::Error::PayloadTooLarge {
                limit: max_body_size,
                actual: bytes.len(),
            });
        }
        let body = Some(bytes);

        Ok(Some(Self {
            method,
            path,
            query_string,
            query_params,
            headers,
            body,
            received_at: Instant::now(),
        }))
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// All headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get query parameters as a HashMap
    #[must_use]
    pub const fn query_map(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Get raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Get the request body as bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_ref().map(AsRef::as_ref)
    }

    /// Get the request body as string (UTF-8)
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        self.body_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Media type of the body, without parameters, lowercased
    /// (`application/json; charset=utf-8` gives `application/json`)
    #[must_use]
    pub fn media_type(&self) -> Option<String> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
    }

    /// HTTP basic credentials from the `Authorization` header
    #[must_use]
    pub fn credentials(&self) -> Option<(String, String)> {
        let value = self.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = BASE64.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }

    /// Whether this is a HEAD request
    #[must_use]
    pub fn is_head(&self) -> bool {
        self.method == Method::Head
    }

    /// When the request entered the stack
    #[must_use]
    pub const fn received_at(&self) -> Instant {
        self.received_at
    }
}

/// Parse query string into HashMap
///
/// Handles URL decoding and duplicate keys (last value wins). A bare key
/// (`?on`) maps to an empty string.
pub(crate) fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .filter_map(|pair| {
                    let mut parts = pair.splitn(2, '=');
                    let key = parts.next()?;
                    let value = parts.next().unwrap_or("");
                    let key = url_decode(key);
                    let value = url_decode(value);
                    Some((key, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Basic URL decoding
pub(crate) fn url_decode(s: &str) -> String {
    let mut bytes = Vec::with_capacity(s.len());
    let mut chars = s.bytes().peekable();

    while let Some(c) = chars.next() {
        match c {
            b'+' => bytes.push(b' '),
            b'%' => {
                let hex: Vec<u8> = chars.by_ref().take(2).collect();
                let decoded = std::str::from_utf8(&hex)
                    .ok()
                    .filter(|h| h.len() == 2)
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(byte) = decoded {
                    bytes.push(byte);
                } else {
                    bytes.push(b'%');
                    bytes.extend_from_slice(&hex);
                }
            }
            _ => bytes.push(c),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_splits_query() {
        let req = Request::new(Method::Get, "/users?page=2&on");
        assert_eq!(req.path, "/users");
        assert_eq!(req.query_string(), Some("page=2&on"));
        assert_eq!(req.query_map().get("page"), Some(&"2".to_string()));
        assert_eq!(req.query_map().get("on"), Some(&String::new()));
    }

    #[test]
    fn test_parse_query_string_simple() {
        let result = parse_query_string(Some("page=1&limit=10"));
        assert_eq!(result.get("page"), Some(&"1".to_string()));
        assert_eq!(result.get("limit"), Some(&"10".to_string()));
    }

    #[test]
    fn test_parse_query_string_empty() {
        assert!(parse_query_string(None).is_empty());
        assert!(parse_query_string(Some("")).is_empty());
    }

    #[test]
    fn test_parse_query_string_url_encoded() {
        let result = parse_query_string(Some("name=John+Doe&city=New%20York"));
        assert_eq!(result.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(result.get("city"), Some(&"New York".to_string()));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("100%25"), "100%");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("bad%zz"), "bad%zz");
    }

    #[test]
    fn test_media_type_strips_parameters() {
        let req = Request::new(Method::Post, "/")
            .with_header("content-type", "Application/JSON; charset=utf-8");
        assert_eq!(req.media_type().as_deref(), Some("application/json"));
    }

    #[test]
    fn test_credentials() {
        // "admin:secret"
        let req = Request::new(Method::Get, "/")
            .with_header("authorization", "Basic YWRtaW46c2VjcmV0");
        assert_eq!(
            req.credentials(),
            Some(("admin".to_string(), "secret".to_string()))
        );

        let bearer = Request::new(Method::Get, "/").with_header("authorization", "Bearer abc");
        assert_eq!(bearer.credentials(), None);
    }

    #[test]
    fn test_is_head() {
        assert!(Request::new(Method::Head, "/").is_head());
        assert!(!Request::new(Method::Get, "/").is_head());
    }
}
