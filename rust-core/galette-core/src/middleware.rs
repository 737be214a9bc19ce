//! # Middleware System
//!
//! Request/response interception around matched routes: logging, timing,
//! RESTful status defaults.
//!
//! ## Design Principles
//!
//! - Each middleware has a single responsibility
//! - Extensible via the [`Middleware`] trait
//! - Registrations are values: two entries of the same type whose settings
//!   compare equal are the same entry, so mounting an API twice never
//!   installs a middleware twice

use crate::dispatcher::Method;
use crate::request::Request;
use crate::response::Response;
use hyper::StatusCode;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Middleware trait for request/response interception
///
/// Middlewares are called in order before the route, and in reverse order
/// after.
pub trait Middleware: Send + Sync {
    /// Called before the route runs
    ///
    /// Can return early with a response.
    fn before_request(&self, _req: &Request) -> MiddlewareResult {
        MiddlewareResult::Continue
    }

    /// Called after the route has produced a response
    fn after_response(&self, _req: &Request, _res: &mut Response) {}

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Result of middleware execution
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue to next middleware/route
    Continue,
    /// Short-circuit with this response (skip the route)
    Respond(Response),
}

type SameFn = fn(&(dyn Any + Send + Sync), &(dyn Any + Send + Sync)) -> bool;

fn same_as<M: PartialEq + 'static>(a: &(dyn Any + Send + Sync), b: &(dyn Any + Send + Sync)) -> bool {
    match (a.downcast_ref::<M>(), b.downcast_ref::<M>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// One middleware registration
#[derive(Clone)]
pub struct MiddlewareEntry {
    layer: Arc<dyn Middleware>,
    value: Arc<dyn Any + Send + Sync>,
    same: SameFn,
}

impl MiddlewareEntry {
    /// Register a middleware value
    #[must_use]
    pub fn new<M: Middleware + PartialEq + 'static>(middleware: M) -> Self {
        let shared = Arc::new(middleware);
        Self {
            layer: shared.clone(),
            value: shared,
            same: same_as::<M>,
        }
    }

    /// Whether two registrations have the same type and equal settings
    #[must_use]
    pub fn is_same(&self, other: &Self) -> bool {
        (self.same)(&*self.value, &*other.value)
    }

    /// The middleware
    #[must_use]
    pub fn layer(&self) -> &Arc<dyn Middleware> {
        &self.layer
    }
}

impl fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.layer.name())
    }
}

/// Ordered, de-duplicated middleware registrations
#[derive(Debug, Clone, Default)]
pub struct MiddlewareList {
    entries: Vec<MiddlewareEntry>,
}

impl MiddlewareList {
    /// Empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry unless an identical one is already present
    pub fn push(&mut self, entry: MiddlewareEntry) {
        if !self.entries.iter().any(|existing| existing.is_same(&entry)) {
            self.entries.push(entry);
        }
    }

    /// Registrations in order
    #[must_use]
    pub fn entries(&self) -> &[MiddlewareEntry] {
        &self.entries
    }

    /// Registrations not already present in `other`
    #[must_use]
    pub fn without(&self, other: &Self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|entry| !other.entries.iter().any(|e| e.is_same(entry)))
                .cloned()
                .collect(),
        }
    }

    /// Chain running these registrations
    #[must_use]
    pub fn chain(&self) -> MiddlewareChain {
        MiddlewareChain {
            middlewares: self.entries.iter().map(|e| e.layer.clone()).collect(),
        }
    }
}

impl crate::config::Merge for MiddlewareList {
    fn merge(&mut self, inner: &Self) {
        for entry in &inner.entries {
            self.push(entry.clone());
        }
    }
}

/// Middleware chain for processing requests
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.middlewares.iter().map(|m| m.name()))
            .finish()
    }
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Execute before_request for all middlewares
    #[must_use]
    pub fn run_before(&self, req: &Request) -> MiddlewareResult {
        for mw in &self.middlewares {
            match mw.before_request(req) {
                MiddlewareResult::Continue => continue,
                result => return result,
            }
        }
        MiddlewareResult::Continue
    }

    /// Execute after_response for all middlewares (in reverse order)
    pub fn run_after(&self, req: &Request, res: &mut Response) {
        for mw in self.middlewares.iter().rev() {
            mw.after_response(req, res);
        }
    }

    /// Run the chain around `inner`
    pub fn wrap(&self, req: &Request, inner: impl FnOnce() -> Response) -> Response {
        let mut response = match self.run_before(req) {
            MiddlewareResult::Continue => inner(),
            MiddlewareResult::Respond(response) => response,
        };
        self.run_after(req, &mut response);
        response
    }

    /// Get the number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

/// Logging middleware - logs requests in structured JSON format
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingMiddleware {
    log_headers: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable header logging
    #[must_use]
    pub const fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl Middleware for LoggingMiddleware {
    fn before_request(&self, req: &Request) -> MiddlewareResult {
        let request_id = req.header("x-request-id").unwrap_or("-");
        if self.log_headers {
            info!(
                method = %req.method,
                path = %req.path,
                request_id = %request_id,
                headers = ?req.headers(),
                "Request received"
            );
        } else {
            info!(
                method = %req.method,
                path = %req.path,
                request_id = %request_id,
                "Request received"
            );
        }
        MiddlewareResult::Continue
    }

    fn after_response(&self, req: &Request, res: &mut Response) {
        let request_id = req.header("x-request-id").unwrap_or("-");
        info!(
            method = %req.method,
            path = %req.path,
            status = res.status.as_u16(),
            request_id = %request_id,
            "Response sent"
        );
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

/// Adds an `X-Runtime` header with the seconds spent since the request
/// entered the stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeMiddleware;

impl Middleware for RuntimeMiddleware {
    fn after_response(&self, req: &Request, res: &mut Response) {
        let elapsed = req.received_at().elapsed().as_secs_f64();
        res.set_header("X-Runtime", &format!("{elapsed:.6}"));
    }

    fn name(&self) -> &'static str {
        "RuntimeMiddleware"
    }
}

/// Status defaults by verb when the application left the status at 200
///
/// - POST: 201 Created, or 204 No Content with an empty body
/// - PUT, PATCH, DELETE: 204 No Content with an empty body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestfulStatus;

impl Middleware for RestfulStatus {
    fn after_response(&self, req: &Request, res: &mut Response) {
        if res.status != StatusCode::OK || res.explicit_status {
            return;
        }
        match req.method {
            Method::Post => {
                res.status = if res.body.is_empty() {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::CREATED
                };
            }
            Method::Put | Method::Patch | Method::Delete if res.body.is_empty() => {
                res.status = StatusCode::NO_CONTENT;
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "RestfulStatus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(PartialEq)]
    struct Tag(&'static str);

    impl Middleware for Tag {
        fn after_response(&self, _req: &Request, res: &mut Response) {
            let seen = res.header("x-tags").unwrap_or("").to_string();
            res.set_header("x-tags", &format!("{seen}{}", self.0));
        }

        fn name(&self) -> &'static str {
            "Tag"
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn before_request(&self, _req: &Request) -> MiddlewareResult {
            MiddlewareResult::Respond(Response::text("no").with_status(StatusCode::FORBIDDEN))
        }
    }

    #[test]
    fn test_middleware_chain_empty() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_after_runs_in_reverse() {
        let mut chain = MiddlewareChain::new();
        chain.add(Tag("a"));
        chain.add(Tag("b"));
        let req = Request::new(Method::Get, "/");
        let res = chain.wrap(&req, || Response::text("ok"));
        assert_eq!(res.header("x-tags"), Some("ba"));
    }

    #[test]
    fn test_before_can_short_circuit() {
        let mut chain = MiddlewareChain::new();
        chain.add(Deny);
        let req = Request::new(Method::Get, "/");
        let res = chain.wrap(&req, || unreachable!("route must not run"));
        assert_eq!(res.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_list_dedups_equal_registrations() {
        let mut list = MiddlewareList::new();
        list.push(MiddlewareEntry::new(Tag("a")));
        list.push(MiddlewareEntry::new(Tag("a")));
        list.push(MiddlewareEntry::new(Tag("b")));
        list.push(MiddlewareEntry::new(RestfulStatus));
        list.push(MiddlewareEntry::new(RestfulStatus));
        assert_eq!(list.entries().len(), 3);
    }

    #[test]
    fn test_merge_dedups() {
        use crate::config::Merge;
        let mut outer = MiddlewareList::new();
        outer.push(MiddlewareEntry::new(LoggingMiddleware::new()));
        let mut inner = MiddlewareList::new();
        inner.push(MiddlewareEntry::new(LoggingMiddleware::new()));
        inner.push(MiddlewareEntry::new(LoggingMiddleware::new().with_headers()));
        outer.merge(&inner);
        assert_eq!(outer.entries().len(), 2);
    }

    #[test]
    fn test_restful_status() {
        let post = Request::new(Method::Post, "/users");
        let mut created = Response::json("{}");
        RestfulStatus.after_response(&post, &mut created);
        assert_eq!(created.status, StatusCode::CREATED);

        let mut empty = Response::default();
        RestfulStatus.after_response(&post, &mut empty);
        assert_eq!(empty.status, StatusCode::NO_CONTENT);

        let delete = Request::new(Method::Delete, "/users/1");
        let mut deleted = Response::default();
        RestfulStatus.after_response(&delete, &mut deleted);
        assert_eq!(deleted.status, StatusCode::NO_CONTENT);

        let mut explicit = Response::default().with_status(StatusCode::OK);
        RestfulStatus.after_response(&post, &mut explicit);
        assert_eq!(explicit.status, StatusCode::OK);

        let get = Request::new(Method::Get, "/users");
        let mut listed = Response::default();
        RestfulStatus.after_response(&get, &mut listed);
        assert_eq!(listed.status, StatusCode::OK);
    }

    #[test]
    fn test_runtime_header() {
        let req = Request::new(Method::Get, "/");
        let mut res = Response::default();
        RuntimeMiddleware.after_response(&req, &mut res);
        let runtime: f64 = res.header("x-runtime").unwrap().parse().unwrap();
        assert!(runtime >= 0.0);
    }

    #[test]
    fn test_logging_middleware_name() {
        assert_eq!(LoggingMiddleware::new().name(), "LoggingMiddleware");
    }
}
