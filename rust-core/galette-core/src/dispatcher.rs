//! # Dispatcher
//!
//! Immutable, ordered route set compiled by `Api::build`.
//!
//! ## Matching
//!
//! Routes are tried in declaration order and the first whose method
//! matcher accepts the request method and whose pattern matches the path
//! wins, even when a later route would also match. Leaf routes match the
//! negotiated path; mounted applications match the request path as sent.
//!
//! Nothing escapes [`Dispatcher::serve`]: unmatched paths become 404 and
//! every fault is resolved inside the endpoint.

use crate::endpoint::Endpoint;
use crate::middleware::MiddlewareChain;
use crate::negotiation::ContentNegotiator;
use crate::path;
use crate::request::Request;
use crate::response::Response;
use crate::route::{PathMatch, Route, RouteTarget};
use crate::settings::Settings;
use hyper::body::Bytes;
use hyper::StatusCode;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// HTTP methods supported by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT
    Put,
    /// HTTP PATCH
    Patch,
    /// HTTP DELETE
    Delete,
    /// HTTP HEAD
    Head,
    /// HTTP OPTIONS
    Options,
}

impl Method {
    /// Verbs a generated 405 route may answer
    pub const ROUTABLE: [Self; 6] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
        Self::Head,
    ];

    /// Upper-case name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Parse a method name, case-insensitively
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        [Self::Options]
            .into_iter()
            .chain(Self::ROUTABLE)
            .find(|method| method.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Convert from hyper's method; `None` for unsupported verbs
    #[must_use]
    pub fn from_hyper(method: &hyper::Method) -> Option<Self> {
        Self::parse(method.as_str())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that turns a request into a response
///
/// Mounted with `Api::mount_app`; a mounted app sees the path remainder
/// after its mount point.
pub trait App: Send + Sync {
    /// Handle a request
    fn call(&self, request: &Request) -> Response;
}

fn not_found() -> Response {
    Response::json(r#"{"error":{"message":"Not Found"}}"#).with_status(StatusCode::NOT_FOUND)
}

/// Compiled API
pub struct Dispatcher {
    routes: Vec<Route>,
    negotiator: ContentNegotiator,
    middleware: MiddlewareChain,
    settings: Settings,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.len())
            .field("negotiator", &self.negotiator)
            .field("middleware", &self.middleware)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Dispatcher {
    /// Dispatcher over compiled routes
    ///
    /// `middleware` wraps every request, matched or not.
    #[must_use]
    pub fn new(
        routes: Vec<Route>,
        negotiator: ContentNegotiator,
        middleware: MiddlewareChain,
        settings: Settings,
    ) -> Self {
        Self {
            routes,
            negotiator,
            middleware,
            settings,
        }
    }

    /// Routes in match order
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Content negotiator
    #[must_use]
    pub const fn negotiator(&self) -> &ContentNegotiator {
        &self.negotiator
    }

    /// Settings shared by every endpoint
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// First route accepting the request
    ///
    /// Anchored routes are matched against `negotiated_path`, mounts
    /// against `request_path`.
    #[must_use]
    pub fn resolve(
        &self,
        method: Method,
        negotiated_path: &str,
        request_path: &str,
    ) -> Option<(&Route, PathMatch)> {
        self.routes.iter().find_map(|route| {
            let path = if route.pattern.is_anchored() {
                negotiated_path
            } else {
                request_path
            };
            route.matches(method, path).map(|matched| (route, matched))
        })
    }

    /// Serve one request
    pub fn serve(&self, request: Request) -> Response {
        let request = Arc::new(request);
        let mut response = self.middleware.wrap(&request, || self.dispatch(&request));
        if request.is_head() {
            response.body = Bytes::new();
        }
        info!(
            method = %request.method,
            path = %request.path,
            status = response.status.as_u16(),
            elapsed_us = u64::try_from(request.received_at().elapsed().as_micros()).unwrap_or(u64::MAX),
            "Request served"
        );
        response
    }

    fn dispatch(&self, request: &Arc<Request>) -> Response {
        let negotiated = self.negotiator.negotiate(
            request.header("accept"),
            &request.path,
            request.query_map(),
        );
        let request_path = path::normalize(&request.path);
        let Some((route, matched)) = self.resolve(request.method, &negotiated.path, &request_path) else {
            debug!(method = %request.method, path = %negotiated.path, "No route matched");
            return not_found();
        };
        debug!(route = %route.pattern, method = %route.method, "Route matched");

        route.middleware.wrap(request, || match &route.target {
            RouteTarget::Endpoint(plan) => {
                Endpoint::new(plan.clone(), request.clone(), negotiated, matched.params).run()
            }
            RouteTarget::App(app) => {
                let mut inner = Request::clone(request);
                inner.path = matched.rest;
                app.call(&inner)
            }
        })
    }
}

impl App for Dispatcher {
    fn call(&self, request: &Request) -> Response {
        self.serve(request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Api;
    use serde_json::json;

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("get"), Some(Method::Get));
        assert_eq!(Method::parse("OPTIONS"), Some(Method::Options));
        assert_eq!(Method::parse("TRACE"), None);
        assert_eq!(Method::from_hyper(&hyper::Method::PATCH), Some(Method::Patch));
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_first_declared_route_wins() {
        let mut api = Api::new();
        api.get("/users/me", |_| Ok(json!("me")));
        api.get("/users/:id", |ep| Ok(json!(ep.param("id"))));
        let dispatcher = api.build().unwrap();

        let me = dispatcher.serve(Request::new(Method::Get, "/users/me"));
        assert_eq!(me.body_text(), "me");
        let other = dispatcher.serve(Request::new(Method::Get, "/users/7"));
        assert_eq!(other.body_text(), "7");
    }

    #[test]
    fn test_unmatched_path_is_404() {
        let mut api = Api::new();
        api.get("/users", |_| Ok(json!([])));
        let response = api.build().unwrap().serve(Request::new(Method::Get, "/nope"));
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body_text(), r#"{"error":{"message":"Not Found"}}"#);
    }

    #[test]
    fn test_head_is_routed_as_get_without_body() {
        let mut api = Api::new();
        api.get("/ping", |_| Ok(json!({"pong": true})));
        let response = api.build().unwrap().serve(Request::new(Method::Head, "/ping"));
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
        assert_eq!(response.content_type(), Some("application/json"));
    }

    struct Echo;

    impl App for Echo {
        fn call(&self, request: &Request) -> Response {
            Response::text(request.path.clone())
        }
    }

    #[test]
    fn test_mounted_app_sees_remainder() {
        let mut api = Api::new();
        api.mount_app("/assets", Arc::new(Echo));
        let dispatcher = api.build().unwrap();

        let response = dispatcher.serve(Request::new(Method::Get, "/assets/css/site.css"));
        assert_eq!(response.body_text(), "/css/site.css");
        let root = dispatcher.serve(Request::new(Method::Post, "/assets"));
        assert_eq!(root.body_text(), "/");
        let sibling = dispatcher.serve(Request::new(Method::Get, "/assetsx"));
        assert_eq!(sibling.status, StatusCode::NOT_FOUND);
    }
}
