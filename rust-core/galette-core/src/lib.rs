//! # Galette Core
//!
//! Runtime library for galette, a declarative DSL for JSON-first HTTP APIs.
//!
//! ## Architecture
//!
//! An [`Api`] is described once with nested scopes, then compiled by
//! [`Api::build`] into an immutable [`Dispatcher`]. Each request is
//! negotiated (version, vendor, format), matched against the routes in
//! declaration order and run through a fresh [`Endpoint`]: body parsing,
//! filters, handler, rescue, rendering and after filters.
//!
//! ## Modules
//!
//! - `api` - Builder DSL: scopes, configuration, filters, helpers, routes
//! - `config` - Scoped configuration frames with typed keys
//! - `negotiation` - `Accept` parsing, versioning and format negotiation
//! - `route` - Route patterns, constraints and generated method routes
//! - `dispatcher` - Compiled route table and request entry point
//! - `endpoint` - Per-request lifecycle
//! - `callbacks` - Before, after and around filters
//! - `rescue` - Error class to handler resolution
//! - `helpers` - Scoped, late-bound helper functions
//! - `params` - Request parameters with require/permit
//! - `parser` / `render` - Body decoding and response encoding
//! - `filters` - Basic authentication and JSONP
//! - `middleware` - Request/response middleware
//! - `server` - HTTP server built on Hyper
//! - `error` / `fault` - Build-time errors and request-time faults

pub mod api;
pub mod callbacks;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod fault;
pub mod filters;
pub mod format;
pub mod helpers;
pub mod json;
pub mod middleware;
pub mod negotiation;
pub mod params;
pub mod parser;
pub mod path;
pub mod render;
pub mod request;
pub mod rescue;
pub mod response;
pub mod route;
pub mod server;
pub mod settings;
pub mod types;

pub use api::Api;
pub use callbacks::{Callback, Condition, Conditions, EndpointFilter, Filter, Next, Phase};
pub use dispatcher::{App, Dispatcher, Method};
pub use endpoint::{Endpoint, Stage};
pub use error::{Error, Result};
pub use fault::{ErrorClass, Fault, Halt, HandlerResult, Interrupt};
pub use filters::{BasicAuth, Jsonp};
pub use format::Format;
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, RuntimeMiddleware};
pub use negotiation::{Strategy, Versioning};
pub use params::Params;
pub use request::Request;
pub use rescue::RescueHandler;
pub use response::Response;
pub use route::{Constraint, MethodMatcher, RouteOptions};
pub use server::{init_tracing, Server, ServerConfig};
pub use settings::{Environment, Settings};
pub use types::ParamType;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
