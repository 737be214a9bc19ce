//! # Route Compiler
//!
//! Turns declared path templates into matchable patterns.
//!
//! ## Template syntax
//!
//! - `:name` captures one segment (up to the next separator)
//! - `*name` captures the rest of the path, separators included
//! - `( ... )` marks an optional group
//!
//! Separators default to `/`, `.` and `?`. Leaf routes are anchored and get
//! an optional `(.:format)` suffix, so `/users` also matches `/users.json`.
//! Mount points are not anchored: they match a path prefix and hand the rest
//! to the mounted application.

use crate::config::ConfigFrame;
use crate::dispatcher::{App, Method};
use crate::endpoint::EndpointPlan;
use crate::error::{Error, Result};
use crate::format::Format;
use crate::middleware::MiddlewareChain;
use crate::request::Request;
use crate::response::Response;
use crate::types::{convert_param, ParamType};
use hyper::StatusCode;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Default segment separators
pub const DEFAULT_SEPARATORS: &[char] = &['/', '.', '?'];

/// Constraint on one named segment
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Segment must match this pattern in full
    Pattern(Regex),
    /// Segment must parse as this type; the captured value is converted
    Typed(ParamType),
}

impl Constraint {
    /// Constraint from a pattern source
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` when the source is not a valid
    /// regular expression.
    pub fn pattern(source: &str) -> Result<Self> {
        Regex::new(source)
            .map(Self::Pattern)
            .map_err(|e| Error::InvalidRoutePattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })
    }

    fn source(&self) -> Option<&str> {
        match self {
            Self::Pattern(regex) => Some(regex.as_str()),
            Self::Typed(ty) => ty.pattern(),
        }
    }
}

impl From<Regex> for Constraint {
    fn from(regex: Regex) -> Self {
        Self::Pattern(regex)
    }
}

impl From<ParamType> for Constraint {
    fn from(ty: ParamType) -> Self {
        Self::Typed(ty)
    }
}

/// Keyword-style route option: a pattern becomes a constraint, anything
/// else becomes a default
#[derive(Debug, Clone)]
pub enum RouteOption {
    /// Constrain the parameter
    Pattern(Constraint),
    /// Default the parameter
    Value(Value),
}

/// Per-route matching options
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    constraints: HashMap<String, Constraint>,
    defaults: Map<String, Value>,
    separators: Option<Vec<char>>,
}

impl RouteOptions {
    /// Empty options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain a named segment
    #[must_use]
    pub fn with_constraint(mut self, name: &str, constraint: impl Into<Constraint>) -> Self {
        self.constraints.insert(name.to_string(), constraint.into());
        self
    }

    /// Default a parameter
    #[must_use]
    pub fn with_default(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.defaults.insert(name.to_string(), value.into());
        self
    }

    /// Keyword-style option
    #[must_use]
    pub fn with_option(self, name: &str, option: RouteOption) -> Self {
        match option {
            RouteOption::Pattern(constraint) => self.with_constraint(name, constraint),
            RouteOption::Value(value) => self.with_default(name, value),
        }
    }

    /// Override the segment separators
    #[must_use]
    pub fn with_separators(mut self, separators: &[char]) -> Self {
        self.separators = Some(separators.to_vec());
        self
    }

    /// Declared constraints
    #[must_use]
    pub const fn constraints(&self) -> &HashMap<String, Constraint> {
        &self.constraints
    }

    /// Declared defaults
    #[must_use]
    pub const fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    /// Layer these options over scope-level constraints and defaults
    #[must_use]
    pub fn over(&self, config: &ConfigFrame) -> Self {
        let mut constraints = config.constraints.clone().unwrap_or_default();
        constraints.extend(self.constraints.clone());
        let mut defaults = config.defaults.clone().unwrap_or_default();
        defaults.extend(self.defaults.clone());
        Self {
            constraints,
            defaults,
            separators: self.separators.clone(),
        }
    }
}

/// Result of matching a path against a pattern
#[derive(Debug, Clone, PartialEq)]
pub struct PathMatch {
    /// Captured parameters, typed where the constraint says so
    pub params: Map<String, Value>,
    /// Unmatched remainder for prefix (mount) patterns; `/` when exhausted
    pub rest: String,
}

/// A compiled path template
#[derive(Debug, Clone)]
pub struct RoutePattern {
    template: String,
    regex: Regex,
    names: Vec<String>,
    typed: HashMap<String, ParamType>,
    anchored: bool,
}

impl RoutePattern {
    /// Compile a normalized template
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` on unbalanced groups, an empty
    /// parameter name, or a constraint that does not compile.
    pub fn compile(template: &str, options: &RouteOptions, anchor: bool) -> Result<Self> {
        let mut template = template.to_string();
        if anchor && !template.contains(":format") {
            template.push_str("(.:format)");
        }

        let separators = options.separators.as_deref().unwrap_or(DEFAULT_SEPARATORS);
        let segment_class = format!(
            "[^{}]+",
            separators
                .iter()
                .map(|c| regex::escape(&c.to_string()))
                .collect::<String>()
        );

        let invalid = |reason: &str| Error::InvalidRoutePattern {
            pattern: template.clone(),
            reason: reason.to_string(),
        };

        let body_source = if !anchor && template == "/" { "" } else { template.as_str() };

        let mut source = String::from("^");
        let mut names = Vec::new();
        let mut typed = HashMap::new();
        let mut depth = 0usize;
        let mut chars = body_source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                ':' | '*' => {
                    let mut name = String::new();
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        return Err(invalid("parameter without a name"));
                    }
                    let constraint = options.constraints.get(&name);
                    let class = match constraint.and_then(Constraint::source) {
                        Some(src) => format!("(?:{src})"),
                        None if c == '*' => ".+".to_string(),
                        None => segment_class.clone(),
                    };
                    if let Some(Constraint::Typed(ty)) = constraint {
                        typed.insert(name.clone(), *ty);
                    }
                    source.push_str(&format!("(?P<{name}>{class})"));
                    names.push(name);
                }
                '(' => {
                    depth += 1;
                    source.push_str("(?:");
                }
                ')' => {
                    if depth == 0 {
                        return Err(invalid("unbalanced `)`"));
                    }
                    depth -= 1;
                    source.push_str(")?");
                }
                other => source.push_str(&regex::escape(&other.to_string())),
            }
        }

        if depth != 0 {
            return Err(invalid("unclosed `(`"));
        }
        if anchor {
            source.push('$');
        }

        let regex = Regex::new(&source).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            template,
            regex,
            names,
            typed,
            anchored: anchor,
        })
    }

    /// Template, including the generated format suffix
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Parameter names in template order
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether the pattern must match the whole path
    #[must_use]
    pub const fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Match a normalized path
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<PathMatch> {
        let captures = self.regex.captures(path)?;
        let end = captures.get(0).map_or(0, |m| m.end());
        let rest = &path[end..];
        if !self.anchored && !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }

        let mut params = Map::new();
        for name in &self.names {
            if let Some(raw) = captures.name(name) {
                let value = match self.typed.get(name) {
                    Some(ty) => convert_param(raw.as_str(), *ty)
                        .unwrap_or_else(|_| Value::String(raw.as_str().to_string())),
                    None => Value::String(raw.as_str().to_string()),
                };
                params.insert(name.clone(), value);
            }
        }

        Some(PathMatch {
            params,
            rest: if rest.is_empty() { "/".to_string() } else { rest.to_string() },
        })
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Which request methods a route accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodMatcher {
    /// One verb; GET also accepts HEAD
    One(Method),
    /// Any verb in the set
    Set(Vec<Method>),
    /// Every verb
    Any,
}

impl MethodMatcher {
    /// Whether `method` is accepted
    #[must_use]
    pub fn accepts(&self, method: Method) -> bool {
        match self {
            Self::One(Method::Get) => matches!(method, Method::Get | Method::Head),
            Self::One(declared) => *declared == method,
            Self::Set(methods) => methods.contains(&method),
            Self::Any => true,
        }
    }
}

impl fmt::Display for MethodMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(method) => write!(f, "{method}"),
            Self::Set(methods) => {
                let names: Vec<&str> = methods.iter().map(Method::as_str).collect();
                f.write_str(&names.join("|"))
            }
            Self::Any => f.write_str("ANY"),
        }
    }
}

/// Defaults captured when a route is compiled
#[derive(Debug, Clone, Default)]
pub struct RouteDefaults {
    /// Default format (the scope's first format)
    pub format: Option<Format>,
    /// Version of the enclosing `version` block
    pub version: Option<String>,
    /// Default parameter values
    pub params: Map<String, Value>,
}

/// What a matched route runs
#[derive(Clone)]
pub enum RouteTarget {
    /// A compiled endpoint, instantiated per request
    Endpoint(Arc<EndpointPlan>),
    /// A raw application receiving the unmatched path remainder
    App(Arc<dyn App>),
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint(_) => f.write_str("Endpoint"),
            Self::App(_) => f.write_str("App"),
        }
    }
}

/// A compiled, immutable route
#[derive(Debug, Clone)]
pub struct Route {
    /// Path pattern
    pub pattern: RoutePattern,
    /// Accepted methods
    pub method: MethodMatcher,
    /// Compile-time defaults
    pub defaults: RouteDefaults,
    /// Frozen configuration snapshot
    pub config: Arc<ConfigFrame>,
    /// Handler
    pub target: RouteTarget,
    /// Middleware run around the target
    pub middleware: MiddlewareChain,
}

impl Route {
    /// Match a method and normalized path
    #[must_use]
    pub fn matches(&self, method: Method, path: &str) -> Option<PathMatch> {
        if !self.method.accepts(method) {
            return None;
        }
        self.pattern.matches(path)
    }
}

/// Answers OPTIONS and disallowed methods for a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowResponder {
    status: StatusCode,
    allow: String,
}

impl AllowResponder {
    /// Status to answer with
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// `Allow` header value
    #[must_use]
    pub fn allow(&self) -> &str {
        &self.allow
    }
}

impl App for AllowResponder {
    fn call(&self, _request: &Request) -> Response {
        let body = if self.status == StatusCode::METHOD_NOT_ALLOWED {
            "Method Not Allowed".to_string()
        } else {
            self.allow.clone()
        };
        Response::text(body)
            .with_status(self.status)
            .with_header("Allow", &self.allow)
    }
}

/// OPTIONS and 405 routes for every path among `routes`
///
/// Routes sharing a template form one group. Groups that already route
/// OPTIONS, or route any method, get nothing. The `Allow` list is the
/// group's methods, plus HEAD when GET is routed, plus OPTIONS, sorted.
#[must_use]
pub fn method_routes(routes: &[Route]) -> Vec<Route> {
    let mut groups: Vec<(&str, Vec<&Route>)> = Vec::new();
    for route in routes.iter().filter(|route| route.pattern.is_anchored()) {
        let template = route.pattern.template();
        match groups.iter_mut().find(|(key, _)| *key == template) {
            Some((_, members)) => members.push(route),
            None => groups.push((template, vec![route])),
        }
    }

    let mut generated = Vec::new();
    for (template, members) in groups {
        let mut allowed = BTreeSet::new();
        let mut open = false;
        for route in &members {
            let methods = match &route.method {
                MethodMatcher::One(method) => vec![*method],
                MethodMatcher::Set(methods) => methods.clone(),
                MethodMatcher::Any => {
                    open = true;
                    Vec::new()
                }
            };
            for method in methods {
                open |= method == Method::Options;
                if method == Method::Get {
                    allowed.insert(Method::Head.as_str());
                }
                allowed.insert(method.as_str());
            }
        }
        if open {
            continue;
        }
        allowed.insert(Method::Options.as_str());
        let allow = allowed.iter().copied().collect::<Vec<_>>().join(", ");

        let Some(first) = members.first() else { continue };
        let responder = |status: StatusCode, method: MethodMatcher| Route {
            pattern: first.pattern.clone(),
            method,
            defaults: RouteDefaults::default(),
            config: first.config.clone(),
            target: RouteTarget::App(Arc::new(AllowResponder {
                status,
                allow: allow.clone(),
            })),
            middleware: first.middleware.clone(),
        };

        debug!(template, allow = %allow, "Generated method routes");
        generated.push(responder(StatusCode::OK, MethodMatcher::One(Method::Options)));
        let disallowed: Vec<Method> = Method::ROUTABLE
            .into_iter()
            .filter(|method| !allowed.contains(method.as_str()))
            .collect();
        if !disallowed.is_empty() {
            generated.push(responder(StatusCode::METHOD_NOT_ALLOWED, MethodMatcher::Set(disallowed)));
        }
    }
    generated
}
