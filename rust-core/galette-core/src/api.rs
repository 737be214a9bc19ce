//! # API Builder
//!
//! Declarative surface for describing an API: nested scopes, per-scope
//! configuration, filters, helpers, rescue handlers and routes.
//!
//! ## Scoping
//!
//! Every block method (`scope`, `namespace`, `param`, `version`) pushes a
//! configuration frame and a helper scope, runs the block, then pops both.
//! The pop happens in a guard's `Drop`, so a panicking block still leaves
//! the builder balanced.
//!
//! Routes snapshot the merged configuration when they are declared.
//! Helpers are resolved when the API is built, so a helper declared after
//! a route in the same scope is still visible to it.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut api = Api::new();
//! api.respond_to(&["json"]);
//! api.namespace("users", |api| {
//!     api.get("/", |_| Ok(json!([])));
//!     api.param("id", |api| {
//!         api.get("/", |ep| Ok(json!({"id": ep.param("id")})));
//!     });
//! });
//! let dispatcher = api.build()?;
//! ```

use crate::callbacks::{Callback, Conditions, Filter, Next, Phase};
use crate::config::{keys, ConfigFrame, ConfigStack, Layered};
use crate::dispatcher::{App, Dispatcher, Method};
use crate::endpoint::{handler_fn, Endpoint, EndpointPlan, HandlerFn};
use crate::error::Result;
use crate::fault::{ErrorClass, HandlerResult, PARAMETER_INVALID, PARAMETER_MISSING};
use crate::filters::BasicAuth;
use crate::format::Format;
use crate::helpers::{helper_fn, memoize, HelperScopes};
use crate::middleware::{Middleware, MiddlewareEntry, MiddlewareList, RestfulStatus};
use crate::negotiation::{ContentNegotiator, Versioning};
use crate::parser::{self, FormParser, JsonParser, Parser};
use crate::path;
use crate::render::Renderer;
use crate::rescue::{RescueEntry, RescueHandler};
use crate::route::{
    method_routes, Constraint, MethodMatcher, Route, RouteDefaults, RouteOptions, RoutePattern,
    RouteTarget,
};
use crate::settings::Settings;
use hyper::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
enum Target {
    Handler(HandlerFn),
    App(Arc<dyn App>),
}

#[derive(Clone)]
struct Declaration {
    template: String,
    method: MethodMatcher,
    options: RouteOptions,
    config: ConfigFrame,
    scope: usize,
    target: Target,
}

impl Declaration {
    const fn is_anchored(&self) -> bool {
        matches!(self.target, Target::Handler(_))
    }
}

/// Configuration every API starts from
fn base_frame() -> ConfigFrame {
    let mut parsers: HashMap<String, Arc<dyn Parser>> = HashMap::new();
    parsers.insert(parser::JSON.to_string(), Arc::new(JsonParser));
    parsers.insert(parser::FORM.to_string(), Arc::new(FormParser));

    let mut middleware = MiddlewareList::new();
    middleware.push(MiddlewareEntry::new(RestfulStatus));

    ConfigFrame::new()
        .with::<keys::Formats>(Layered::reset([Format::json()]))
        .with::<keys::Parses>(Layered::reset([parser::JSON.to_string()]))
        .with::<keys::Parsers>(parsers)
        .with::<keys::Middleware>(middleware)
        .with::<keys::Rescuers>(vec![
            RescueEntry::new(&PARAMETER_MISSING, RescueHandler::status(StatusCode::BAD_REQUEST)),
            RescueEntry::new(&PARAMETER_INVALID, RescueHandler::status(StatusCode::BAD_REQUEST)),
        ])
}

/// Pops the frame and helper scope of a block, even on unwind
struct ScopeGuard<'a> {
    api: &'a mut Api,
    depth: usize,
    trail: usize,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        while self.api.stack.depth() > self.depth {
            self.api.stack.pop();
        }
        self.api.trail.truncate(self.trail);
    }
}

/// API under construction
///
/// Build it into a [`Dispatcher`] with [`Api::build`]. An `Api` can also be
/// mounted into another one with [`Api::mount`].
pub struct Api {
    stack: ConfigStack,
    helpers: HelperScopes,
    trail: Vec<usize>,
    decls: Vec<Declaration>,
    versions: Vec<String>,
    versioning: Versioning,
    settings: Settings,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            stack: ConfigStack::default(),
            helpers: HelperScopes::new(),
            trail: Vec::new(),
            decls: Vec::new(),
            versions: Vec::new(),
            versioning: Versioning::default(),
            settings: Settings::default(),
        }
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("depth", &self.stack.depth())
            .field("routes", &self.decls.len())
            .field("versions", &self.versions)
            .field("versioning", &self.versioning)
            .finish_non_exhaustive()
    }
}

macro_rules! verbs {
    ($($verb:ident, $verb_with:ident => $method:ident;)*) => {
        $(
            #[doc = concat!("Declare a `", stringify!($method), "` route")]
            pub fn $verb<F>(&mut self, path: &str, handler: F) -> &mut Self
            where
                F: Fn(&mut Endpoint) -> HandlerResult + Send + Sync + 'static,
            {
                self.$verb_with(path, RouteOptions::new(), handler)
            }

            #[doc = concat!("Declare a `", stringify!($method), "` route with options")]
            pub fn $verb_with<F>(&mut self, path: &str, options: RouteOptions, handler: F) -> &mut Self
            where
                F: Fn(&mut Endpoint) -> HandlerResult + Send + Sync + 'static,
            {
                self.route(MethodMatcher::One(Method::$method), path, options, handler_fn(handler))
            }
        )*
    };
}

impl Api {
    /// Empty API with settings read from the environment
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the settings shared by every endpoint
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Number of open configuration frames, root included
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Versions declared so far, in declaration order
    #[must_use]
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    fn current_scope(&self) -> usize {
        self.trail.last().copied().unwrap_or(HelperScopes::ROOT)
    }

    fn namespaces(&self) -> Vec<String> {
        self.stack
            .all::<keys::Namespace>()
            .into_iter()
            .cloned()
            .collect()
    }

    fn within(&mut self, frame: ConfigFrame, block: impl FnOnce(&mut Self)) -> &mut Self {
        let depth = self.stack.depth();
        let trail = self.trail.len();
        let scope = self.helpers.open(self.current_scope());
        self.stack.push(frame);
        self.trail.push(scope);
        {
            let mut guard = ScopeGuard {
                api: &mut *self,
                depth,
                trail,
            };
            block(&mut *guard.api);
        }
        self
    }

    // Scopes

    /// Run `block` in a nested scope under `path`
    pub fn scope(&mut self, path: &str, block: impl FnOnce(&mut Self)) -> &mut Self {
        self.within(
            ConfigFrame::new().with::<keys::Namespace>(path.to_string()),
            block,
        )
    }

    /// Alias of [`Api::scope`]
    pub fn namespace(&mut self, path: &str, block: impl FnOnce(&mut Self)) -> &mut Self {
        self.scope(path, block)
    }

    /// Alias of [`Api::scope`]
    pub fn resource(&mut self, path: &str, block: impl FnOnce(&mut Self)) -> &mut Self {
        self.scope(path, block)
    }

    /// Scope under a `:name` path parameter
    pub fn param(&mut self, name: &str, block: impl FnOnce(&mut Self)) -> &mut Self {
        self.scope(&format!(":{name}"), block)
    }

    /// Scope under a constrained `:name` path parameter
    pub fn param_with(
        &mut self,
        name: &str,
        constraint: impl Into<Constraint>,
        block: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let mut constraints = HashMap::new();
        constraints.insert(name.to_string(), constraint.into());
        self.within(
            ConfigFrame::new()
                .with::<keys::Namespace>(format!(":{name}"))
                .with::<keys::Constraints>(constraints),
            block,
        )
    }

    /// Scope for an API version
    ///
    /// Routes inside live under the version's path segment; the configured
    /// versioning strategy decides how requests reach them.
    pub fn version(&mut self, version: &str, block: impl FnOnce(&mut Self)) -> &mut Self {
        if !self.versions.iter().any(|known| known == version) {
            self.versions.push(version.to_string());
        }
        self.within(
            ConfigFrame::new()
                .with::<keys::Version>(version.to_string())
                .with::<keys::Namespace>(version.to_string()),
            block,
        )
    }

    // Configuration

    /// Set how versions are read from requests
    ///
    /// A vendor in `versioning` is also required of vendor media types in
    /// the current scope.
    pub fn versioning(&mut self, versioning: Versioning) -> &mut Self {
        if let Some(vendor) = &versioning.vendor {
            self.stack.write::<keys::Vendor>(vendor.clone());
        }
        self.versioning = versioning;
        self
    }

    /// Require a vendor in vendor media types for the current scope
    pub fn vendor(&mut self, vendor: &str) -> &mut Self {
        self.stack.write::<keys::Vendor>(vendor.to_string());
        self
    }

    /// Formats the current scope responds to, by name; replaces outer ones
    pub fn respond_to(&mut self, formats: &[&str]) -> &mut Self {
        self.respond_to_with(formats.iter().map(|name| Format::named(name)))
    }

    /// Formats the current scope responds to; replaces outer ones
    pub fn respond_to_with(&mut self, formats: impl IntoIterator<Item = Format>) -> &mut Self {
        self.stack.write::<keys::Formats>(Layered::reset(formats));
        self
    }

    /// Renderer for a format name
    pub fn renderer(&mut self, format: &str, renderer: impl Renderer + 'static) -> &mut Self {
        let renderer: Arc<dyn Renderer> = Arc::new(renderer);
        self.stack
            .update::<keys::Renderers>(|renderers| {
                renderers.insert(format.to_string(), renderer);
            });
        self
    }

    /// Media types the current scope parses; replaces outer ones
    pub fn parses(&mut self, media_types: &[&str]) -> &mut Self {
        self.stack.write::<keys::Parses>(Layered::reset(
            media_types.iter().map(|media| (*media).to_string()),
        ));
        self
    }

    /// Parser for a media type
    pub fn parser(&mut self, media_type: &str, parser: impl Parser + 'static) -> &mut Self {
        let parser: Arc<dyn Parser> = Arc::new(parser);
        self.stack.update::<keys::Parsers>(|parsers| {
            parsers.insert(media_type.to_string(), parser);
        });
        self
    }

    /// Add middleware; an equal middleware already in an outer scope is not
    /// added twice
    pub fn use_middleware<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Middleware + PartialEq + 'static,
    {
        self.stack.update::<keys::Middleware>(|list| {
            list.push(MiddlewareEntry::new(middleware));
        });
        self
    }

    /// Constrain a path parameter for routes in the current scope
    pub fn constraint(&mut self, name: &str, constraint: impl Into<Constraint>) -> &mut Self {
        let constraint = constraint.into();
        self.stack.update::<keys::Constraints>(|constraints| {
            constraints.insert(name.to_string(), constraint);
        });
        self
    }

    /// Default a parameter for routes in the current scope
    pub fn default_param(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        self.stack.update::<keys::Defaults>(|defaults| {
            defaults.insert(name.to_string(), value);
        });
        self
    }

    /// Handle faults of `class` and its descendants
    pub fn rescue_from(&mut self, class: &'static ErrorClass, handler: RescueHandler) -> &mut Self {
        self.stack.update::<keys::Rescuers>(|rescuers| {
            rescuers.push(RescueEntry::new(class, handler));
        });
        self
    }

    // Filters

    /// Register a callback in the current scope
    pub fn callback(&mut self, callback: Callback) -> &mut Self {
        self.stack.update::<keys::Callbacks>(|callbacks| callbacks.push(callback));
        self
    }

    /// Closure run before the handler
    pub fn before<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(&mut Endpoint) -> HandlerResult + Send + Sync + 'static,
    {
        self.before_with(Filter::inline(filter), Conditions::new())
    }

    /// Closure run after the response is rendered
    pub fn after<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(&mut Endpoint) -> HandlerResult + Send + Sync + 'static,
    {
        self.after_with(Filter::inline(filter), Conditions::new())
    }

    /// Closure wrapping the before filters and the handler
    pub fn around<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(&mut Endpoint, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.around_with(Filter::wrap(filter), Conditions::new())
    }

    /// Before filter with conditions
    pub fn before_with(&mut self, filter: Filter, conditions: Conditions) -> &mut Self {
        self.callback(Callback::new(Phase::Before, filter).with_conditions(conditions))
    }

    /// After filter with conditions
    pub fn after_with(&mut self, filter: Filter, conditions: Conditions) -> &mut Self {
        self.callback(Callback::new(Phase::After, filter).with_conditions(conditions))
    }

    /// Around filter with conditions
    pub fn around_with(&mut self, filter: Filter, conditions: Conditions) -> &mut Self {
        self.callback(Callback::new(Phase::Around, filter).with_conditions(conditions))
    }

    /// Require HTTP basic credentials accepted by `check`
    ///
    /// Each call adds another challenge; all of them must pass.
    pub fn basic_auth<F>(&mut self, realm: &str, check: F) -> &mut Self
    where
        F: Fn(&Endpoint, &str, &str) -> bool + Send + Sync + 'static,
    {
        self.before_with(Filter::object(BasicAuth::new(realm, check)), Conditions::new())
    }

    // Helpers

    /// Declare a helper visible to the current scope and those nested in it
    pub fn helper<F>(&mut self, name: &str, helper: F) -> &mut Self
    where
        F: Fn(&mut Endpoint, &[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        let scope = self.current_scope();
        self.helpers.define(scope, name, helper_fn(helper));
        self
    }

    /// Declare a helper whose result is cached per request and arguments
    pub fn memo<F>(&mut self, name: &str, helper: F) -> &mut Self
    where
        F: Fn(&mut Endpoint, &[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        let scope = self.current_scope();
        self.helpers
            .define(scope, name, memoize(name, helper_fn(helper)));
        self
    }

    /// Like [`Api::memo`], also evaluated by a before filter on every
    /// request in scope
    pub fn memo_eager<F>(&mut self, name: &str, helper: F) -> &mut Self
    where
        F: Fn(&mut Endpoint, &[Value]) -> HandlerResult + Send + Sync + 'static,
    {
        self.memo(name, helper)
            .before_with(Filter::method(name), Conditions::new())
    }

    // Routes

    verbs! {
        get, get_with => Get;
        post, post_with => Post;
        put, put_with => Put;
        patch, patch_with => Patch;
        delete, delete_with => Delete;
    }

    /// Declare a route accepting every method
    pub fn any<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&mut Endpoint) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(MethodMatcher::Any, path, RouteOptions::new(), handler_fn(handler))
    }

    /// Declare a route
    pub fn route(
        &mut self,
        method: MethodMatcher,
        path: &str,
        options: RouteOptions,
        handler: HandlerFn,
    ) -> &mut Self {
        self.declare(method, path, options, Target::Handler(handler))
    }

    /// Mount an application under `prefix`; it receives the path remainder
    pub fn mount_app(&mut self, prefix: &str, app: Arc<dyn App>) -> &mut Self {
        self.declare(MethodMatcher::Any, prefix, RouteOptions::new(), Target::App(app))
    }

    /// Splice another API's routes under `prefix`
    ///
    /// The child's routes keep their own configuration, layered over the
    /// current scope's. Middleware the current scope already runs is not
    /// run twice. Helpers of the current scope are visible to the child.
    pub fn mount(&mut self, prefix: &str, child: Self) -> &mut Self {
        let base = path::join(&self.namespaces(), prefix);
        let outer = self.stack.snapshot();
        let offset = self.helpers.graft(&child.helpers, self.current_scope());
        for decl in child.decls {
            let mut config = outer.clone();
            config.merge(&decl.config);
            self.decls.push(Declaration {
                template: path::join(&[base.as_str()], &decl.template),
                config,
                scope: decl.scope + offset,
                ..decl
            });
        }
        for version in child.versions {
            if !self.versions.contains(&version) {
                self.versions.push(version);
            }
        }
        self
    }

    fn declare(
        &mut self,
        method: MethodMatcher,
        path: &str,
        options: RouteOptions,
        target: Target,
    ) -> &mut Self {
        let template = path::join(&self.namespaces(), path);
        self.decls.push(Declaration {
            template,
            method,
            options,
            config: self.stack.snapshot(),
            scope: self.current_scope(),
            target,
        });
        self
    }

    /// Compile every declaration into a dispatcher
    ///
    /// Each path gets generated OPTIONS and 405 routes after the declared
    /// ones.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for a template that does not
    /// compile and `Error::UnknownHelper` when a filter, condition or
    /// rescue handler names a helper no enclosing scope declares.
    pub fn build(&self) -> Result<Dispatcher> {
        let base = base_frame();
        let mut root = base.clone();
        root.merge(&self.stack.snapshot());
        let root_middleware = root.value::<keys::Middleware>();

        let mut routes = Vec::with_capacity(self.decls.len());
        for decl in &self.decls {
            let mut config = base.clone();
            config.merge(&decl.config);
            let options = decl.options.over(&config);
            let pattern = RoutePattern::compile(&decl.template, &options, decl.is_anchored())?;
            let target = match &decl.target {
                Target::Handler(handler) => RouteTarget::Endpoint(Arc::new(EndpointPlan::compile(
                    pattern.template(),
                    &config,
                    options.defaults().clone(),
                    handler.clone(),
                    self.helpers.table(decl.scope),
                    self.settings.clone(),
                )?)),
                Target::App(app) => RouteTarget::App(app.clone()),
            };
            debug!(method = %decl.method, template = pattern.template(), "Compiled route");
            routes.push(Route {
                defaults: RouteDefaults {
                    format: config.value::<keys::Formats>().first().cloned(),
                    version: config.get::<keys::Version>().cloned(),
                    params: options.defaults().clone(),
                },
                middleware: config
                    .value::<keys::Middleware>()
                    .without(&root_middleware)
                    .chain(),
                pattern,
                method: decl.method.clone(),
                config: Arc::new(config),
                target,
            });
        }
        let generated = method_routes(&routes);
        routes.extend(generated);

        let negotiator = ContentNegotiator::new(self.versioning.clone(), self.versions.clone());
        Ok(Dispatcher::new(
            routes,
            negotiator,
            root_middleware.chain(),
            self.settings.clone(),
        ))
    }
}
