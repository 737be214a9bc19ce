//! # HTTP Response
//!
//! Transport-neutral response produced by `Dispatcher::serve`.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, StatusCode};

/// HTTP response
#[derive(Debug, Clone)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
    /// Whether application code chose the status, rather than it being the
    /// default 200
    pub explicit_status: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            explicit_status: false,
        }
    }
}

impl Response {
    /// Create a JSON response
    #[must_use]
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::default()
            .with_body(body)
            .with_header("Content-Type", "application/json")
    }

    /// Create a text response
    #[must_use]
    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::default()
            .with_body(body)
            .with_header("Content-Type", "text/plain")
    }

    /// Set status code
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self.explicit_status = true;
        self
    }

    /// Set body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header; invalid names or values are ignored
    pub fn set_header(&mut self, key: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    /// Header value by name
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Content type, if set
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Body as UTF-8 text, lossy
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Convert to hyper Response
    #[must_use]
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let mut response = hyper::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_json() {
        let resp = Response::json(r#"{"status":"ok"}"#);
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.content_type(), Some("application/json"));
        assert!(!resp.explicit_status);
    }

    #[test]
    fn test_response_with_status() {
        let resp = Response::text("Not Found").with_status(StatusCode::NOT_FOUND);
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert!(resp.explicit_status);
    }

    #[test]
    fn test_set_header_overrides() {
        let mut resp = Response::text("x");
        resp.set_header("content-type", "text/csv");
        resp.set_header("bad header", "x");
        assert_eq!(resp.content_type(), Some("text/csv"));
        assert_eq!(resp.headers.len(), 1);
    }

    #[test]
    fn test_into_hyper() {
        let hyper_resp = Response::text("hi")
            .with_status(StatusCode::CREATED)
            .with_header("X-Trace", "1")
            .into_hyper();
        assert_eq!(hyper_resp.status(), StatusCode::CREATED);
        assert_eq!(hyper_resp.headers().get("x-trace").unwrap(), "1");
    }
}
