//! # Endpoint
//!
//! Per-request orchestrator. A fresh [`Endpoint`] is built from a route's
//! [`EndpointPlan`] for every request and consumed by [`Endpoint::run`].
//!
//! ## Lifecycle
//!
//! ```text
//! Created -> Negotiated -> Unacceptable       (terminal unless an after filter halts or faults)
//!                       -> Parsed -> BeforeRun -> Handled -> Rendered -> AfterRun -> Finished
//!           Errored: from Parsed, BeforeRun or Handled, rescued, then Rendered
//!           Halted:  from any earlier stage, straight to AfterRun
//! ```
//!
//! After filters run in every case, `Unacceptable` included. A halt or
//! fault raised by an after filter stops the remaining after filters and
//! replaces the response body.

use crate::callbacks::CompiledChain;
use crate::config::{keys, ConfigFrame};
use crate::error::Result;
use crate::fault::{Fault, HandlerResult, Halt, Interrupt, NAME_ERROR};
use crate::format::{media_matches, Format};
use crate::helpers::HelperTable;
use crate::json::to_json;
use crate::negotiation::NegotiatedRequest;
use crate::params::Params;
use crate::parser::Parser;
use crate::render::{Renderer, SimpleRenderer};
use crate::request::Request;
use crate::rescue::{self, CompiledRescues};
use crate::response::Response;
use crate::settings::Settings;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use hyper::{HeaderMap, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, trace, warn};

/// Route handler
pub type HandlerFn = Arc<dyn Fn(&mut Endpoint) -> HandlerResult + Send + Sync>;

/// Wrap a closure as a [`HandlerFn`]
pub fn handler_fn<F>(f: F) -> HandlerFn
where
    F: Fn(&mut Endpoint) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Built, nothing run
    Created,
    /// Negotiation started
    Negotiated,
    /// No acceptable format; terminal
    Unacceptable,
    /// Body parsed
    Parsed,
    /// Callback chain running
    BeforeRun,
    /// Handler returned
    Handled,
    /// A fault is being rescued
    Errored,
    /// A halt short-circuited the current phase
    Halted,
    /// Response body rendered
    Rendered,
    /// After filters running
    AfterRun,
    /// Response produced
    Finished,
}

impl Stage {
    /// Whether `next` may follow this stage
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        use Stage::{
            AfterRun, BeforeRun, Created, Errored, Finished, Halted, Handled, Negotiated, Parsed,
            Rendered, Unacceptable,
        };
        matches!(
            (self, next),
            (Created, Negotiated)
                | (Negotiated, Unacceptable | Parsed | Halted)
                | (Unacceptable, Halted | Errored)
                | (Parsed, BeforeRun | Errored | Halted)
                | (BeforeRun, Handled | Errored | Halted)
                | (Handled, Rendered | Errored | Halted)
                | (Errored, Rendered | Halted | Finished)
                | (Halted, AfterRun | Finished)
                | (Rendered, AfterRun)
                | (AfterRun, Halted | Errored | Finished)
        )
    }
}

/// Everything an endpoint needs from its route, compiled once at build
pub struct EndpointPlan {
    /// Route template, for logs and errors
    pub template: String,
    /// Offered formats, first is the default
    pub formats: Vec<Format>,
    /// Custom renderers by format name
    pub renderers: HashMap<String, Arc<dyn Renderer>>,
    /// Accepted request media types
    pub parses: Vec<String>,
    /// Body parsers by media type
    pub parsers: HashMap<String, Arc<dyn Parser>>,
    /// Expected vendor
    pub vendor: Option<String>,
    /// Version of the enclosing `version` block
    pub version: Option<String>,
    /// Default parameters
    pub defaults: Map<String, Value>,
    /// Composed callbacks around the handler
    pub chain: CompiledChain,
    /// Rescue handlers
    pub rescues: CompiledRescues,
    /// Visible helpers
    pub helpers: HelperTable,
    /// API settings
    pub settings: Settings,
}

impl fmt::Debug for EndpointPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointPlan")
            .field("template", &self.template)
            .field("formats", &self.formats)
            .field("parses", &self.parses)
            .field("vendor", &self.vendor)
            .field("version", &self.version)
            .field("rescues", &self.rescues)
            .finish_non_exhaustive()
    }
}

impl EndpointPlan {
    /// Compile a route's frozen config
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownHelper` when a filter, condition or rescue
    /// handler names a helper missing from `helpers`.
    pub fn compile(
        template: &str,
        config: &ConfigFrame,
        defaults: Map<String, Value>,
        handler: HandlerFn,
        helpers: HelperTable,
        settings: Settings,
    ) -> Result<Self> {
        let handler = handler_fn(move |ep| {
            let value = handler(ep)?;
            ep.advance(Stage::Handled);
            Ok(value)
        });
        let chain =
            CompiledChain::compile(&config.value::<keys::Callbacks>(), handler, &helpers, template)?;
        let rescues = rescue::compile(&config.value::<keys::Rescuers>(), &helpers, template)?;

        let mut formats = config.value::<keys::Formats>().items().to_vec();
        if formats.is_empty() {
            formats.push(Format::json());
        }

        Ok(Self {
            template: template.to_string(),
            formats,
            renderers: config.value::<keys::Renderers>(),
            parses: config.value::<keys::Parses>().items().to_vec(),
            parsers: config.value::<keys::Parsers>(),
            vendor: config.get::<keys::Vendor>().cloned(),
            version: config.get::<keys::Version>().cloned(),
            defaults,
            chain,
            rescues,
            helpers,
            settings,
        })
    }
}

fn error_body(status: StatusCode, message: Option<&str>, mut data: Map<String, Value>) -> Value {
    let message = message
        .map(str::to_string)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| status.as_str().to_string());
    data.insert("message".to_string(), Value::String(message));
    json!({ "error": data })
}

/// One request's execution state
pub struct Endpoint {
    plan: Arc<EndpointPlan>,
    request: Arc<Request>,
    negotiated: NegotiatedRequest,
    params: Params,
    format: Option<Format>,
    status: StatusCode,
    explicit_status: bool,
    headers: HeaderMap,
    body: Bytes,
    input: Option<Value>,
    locals: Map<String, Value>,
    memos: HashMap<String, Value>,
    stage: Stage,
    history: Vec<Stage>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("route", &self.plan.template)
            .field("stage", &self.stage)
            .field("status", &self.status)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Endpoint for a matched request
    ///
    /// Parameters are layered as defaults, then path captures, then the
    /// negotiated query string. A parsed body object is merged on top
    /// when the endpoint runs.
    #[must_use]
    pub fn new(
        plan: Arc<EndpointPlan>,
        request: Arc<Request>,
        negotiated: NegotiatedRequest,
        captures: Map<String, Value>,
    ) -> Self {
        let mut params = Params::from_map(plan.defaults.clone());
        params.merge(captures);
        params.merge_strings(&negotiated.query);
        Self {
            plan,
            request,
            negotiated,
            params,
            format: None,
            status: StatusCode::OK,
            explicit_status: false,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            input: None,
            locals: Map::new(),
            memos: HashMap::new(),
            stage: Stage::Created,
            history: vec![Stage::Created],
        }
    }

    /// Run the lifecycle to a response
    pub fn run(mut self) -> Response {
        self.advance(Stage::Negotiated);
        if !self.negotiate_format() {
            self.advance(Stage::Unacceptable);
            let accepts: Vec<Value> = self.plan.formats.iter().map(|f| Value::from(f.mime())).collect();
            self.set_status(StatusCode::NOT_ACCEPTABLE);
            let mut data = Map::new();
            data.insert("accepts".to_string(), Value::Array(accepts));
            let body = error_body(StatusCode::NOT_ACCEPTABLE, None, data);
            self.render(&body);
            self.run_after();
            return self.finish();
        }

        let outcome = match self.parse_body() {
            Ok(()) => {
                self.advance(Stage::Parsed);
                self.advance(Stage::BeforeRun);
                let chain = self.plan.chain.clone();
                (chain.unit())(&mut self)
            }
            Err(interrupt) => Err(interrupt),
        };
        self.settle(outcome);
        self.run_after();
        self.finish()
    }

    pub(crate) fn advance(&mut self, next: Stage) {
        if !self.stage.can_advance_to(next) {
            warn!(route = %self.plan.template, from = ?self.stage, to = ?next, "Unexpected endpoint transition");
        }
        trace!(route = %self.plan.template, from = ?self.stage, to = ?next, "Endpoint transition");
        self.stage = next;
        self.history.push(next);
    }

    fn negotiate_format(&mut self) -> bool {
        let plan = self.plan.clone();
        let formats = &plan.formats;

        if let (Some(expected), Some(requested)) = (&plan.vendor, &self.negotiated.vendor) {
            if expected != requested {
                self.format = formats.first().cloned();
                return false;
            }
        }

        let captured = self.params.get_str("format").map(str::to_ascii_lowercase);
        let chosen = match &captured {
            Some(name) => formats.iter().find(|f| f.name() == name).cloned().or_else(|| {
                if self.negotiated.format_from_accept() {
                    self.negotiated.accept.best_of(formats).cloned()
                } else {
                    None
                }
            }),
            None => formats.first().cloned(),
        };

        match chosen {
            Some(format) => {
                if captured.is_some() {
                    self.params.insert("format", format.name());
                }
                self.format = Some(format);
                true
            }
            None => {
                self.format = formats.first().cloned();
                false
            }
        }
    }

    fn parse_body(&mut self) -> std::result::Result<(), Interrupt> {
        let request = self.request.clone();
        let Some(body) = request
            .body_bytes()
            .filter(|body| !body.iter().all(u8::is_ascii_whitespace))
        else {
            return Ok(());
        };

        let media = request.media_type().unwrap_or_default();
        let plan = self.plan.clone();
        if !plan.parses.iter().any(|accepted| media_matches(accepted, &media)) {
            return Err(self.error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!("Content-type \"{media}\" not supported"),
            ));
        }

        let input = match plan.parsers.get(&media) {
            Some(parser) => match parser.parse(body) {
                Ok(value) => value,
                Err(_) => {
                    return Err(self.error(StatusCode::BAD_REQUEST, format!("Invalid {}", parser.name())));
                }
            },
            None => Value::String(String::from_utf8_lossy(body).into_owned()),
        };

        if let Value::Object(fields) = &input {
            self.params.merge(fields.clone());
        }
        self.input = Some(input);
        Ok(())
    }

    fn settle(&mut self, outcome: HandlerResult) {
        let value = match outcome {
            Ok(value) => value,
            Err(Interrupt::Halt(halt)) => {
                self.advance(Stage::Halted);
                halt.into_body()
            }
            Err(Interrupt::Fault(fault)) => {
                self.advance(Stage::Errored);
                self.rescue(&fault)
            }
        };
        self.render(&value);
        if self.stage != Stage::Halted {
            self.advance(Stage::Rendered);
        }
    }

    fn rescue(&mut self, fault: &Fault) -> Value {
        let plan = self.plan.clone();
        let Some(handler) = plan.rescues.resolve(fault.class()) else {
            return self.unhandled(fault);
        };
        match handler(self, fault) {
            Ok(value) => value,
            Err(Interrupt::Halt(halt)) => {
                self.advance(Stage::Halted);
                halt.into_body()
            }
            Err(Interrupt::Fault(inner)) => self.unhandled(&inner),
        }
    }

    fn unhandled(&mut self, fault: &Fault) -> Value {
        error!(
            route = %self.plan.template,
            class = fault.class().name(),
            message = fault.message(),
            "Unhandled fault"
        );
        let data = self.fault_data(fault);
        self.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        error_body(StatusCode::INTERNAL_SERVER_ERROR, Some(fault.message()), data)
    }

    fn fault_data(&self, fault: &Fault) -> Map<String, Value> {
        let mut data = Map::new();
        if self.plan.settings.expose_backtrace {
            let lines = fault.backtrace_lines();
            if !lines.is_empty() {
                data.insert("backtrace".to_string(), Value::from(lines));
            }
        }
        data
    }

    fn render(&mut self, value: &Value) {
        let format = self.format.clone().unwrap_or_else(Format::json);
        let rendered = match self.plan.renderers.get(format.name()) {
            Some(renderer) => renderer.render(value, &format),
            None => SimpleRenderer.render(value, &format),
        };
        match rendered {
            Ok(body) => self.body = body,
            Err(e) => {
                error!(route = %self.plan.template, format = %format, error = %e, "Render failed");
                self.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                let fallback = error_body(StatusCode::INTERNAL_SERVER_ERROR, Some(&e.to_string()), Map::new());
                self.body = to_json(&fallback).map(Bytes::from).unwrap_or_default();
            }
        }
    }

    fn run_after(&mut self) {
        if self.stage != Stage::Unacceptable {
            self.advance(Stage::AfterRun);
        }
        let chain = self.plan.chain.clone();
        for after in chain.after() {
            match after(self) {
                Ok(_) => {}
                Err(Interrupt::Halt(halt)) => {
                    self.advance(Stage::Halted);
                    self.render(halt.body());
                    break;
                }
                Err(Interrupt::Fault(fault)) => {
                    self.advance(Stage::Errored);
                    let value = self.rescue(&fault);
                    self.render(&value);
                    break;
                }
            }
        }
    }

    fn finish(mut self) -> Response {
        if self.stage != Stage::Unacceptable {
            self.advance(Stage::Finished);
        }
        if !self.headers.contains_key(CONTENT_TYPE) {
            if let Some(format) = &self.format {
                if let Ok(value) = HeaderValue::from_str(format.mime()) {
                    self.headers.insert(CONTENT_TYPE, value);
                }
            }
        }
        trace!(route = %self.plan.template, history = ?self.history, "Endpoint finished");
        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
            explicit_status: self.explicit_status,
        }
    }

    /// The request being handled
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Negotiation result
    #[must_use]
    pub const fn negotiated(&self) -> &NegotiatedRequest {
        &self.negotiated
    }

    /// Route template
    #[must_use]
    pub fn route(&self) -> &str {
        &self.plan.template
    }

    /// Merged parameters
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Merged parameters, mutable
    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    /// One parameter
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Parsed request body
    #[must_use]
    pub const fn input(&self) -> Option<&Value> {
        self.input.as_ref()
    }

    /// Negotiated response format
    #[must_use]
    pub const fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    /// Vendor from the request, else the configured one
    #[must_use]
    pub fn vendor(&self) -> Option<&str> {
        self.negotiated
            .vendor
            .as_deref()
            .or(self.plan.vendor.as_deref())
    }

    /// Negotiated version, else the route's `version` block
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.negotiated
            .version
            .as_deref()
            .or(self.plan.version.as_deref())
    }

    /// Response status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the response status
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.explicit_status = true;
    }

    /// Response header
    #[must_use]
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set a response header; invalid names or values are ignored
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    /// Response headers
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Rendered body; empty until rendering
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replace the rendered body (after filters)
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Request-scoped value shared between filters and the handler
    #[must_use]
    pub fn local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    /// Store a request-scoped value
    pub fn set_local(&mut self, key: impl Into<String>, value: Value) {
        self.locals.insert(key.into(), value);
    }

    pub(crate) fn memo(&self, key: &str) -> Option<&Value> {
        self.memos.get(key)
    }

    pub(crate) fn set_memo(&mut self, key: String, value: Value) {
        self.memos.insert(key, value);
    }

    /// Call a helper visible to this route
    ///
    /// # Errors
    ///
    /// Returns a `NameError` fault for an unknown helper and propagates the
    /// helper's own interrupts.
    pub fn helper(&mut self, name: &str, args: &[Value]) -> HandlerResult {
        let helper = self
            .plan
            .helpers
            .get(name)
            .cloned()
            .ok_or_else(|| Fault::new(&NAME_ERROR, format!("undefined helper `{name}`")))?;
        helper(self, args)
    }

    /// Current stage
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Stages visited so far
    #[must_use]
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Halt with a status and payload
    pub fn halt(&mut self, status: StatusCode, body: Value) -> Interrupt {
        self.set_status(status);
        Interrupt::Halt(Halt::new(body))
    }

    /// Halt with `{"error": {"message": ...}}`
    pub fn error(&mut self, status: StatusCode, message: impl Into<String>) -> Interrupt {
        let message = message.into();
        self.error_with(status, Some(&message), Map::new())
    }

    /// Halt with an error payload carrying extra data; the message
    /// defaults to the status reason phrase
    pub fn error_with(
        &mut self,
        status: StatusCode,
        message: Option<&str>,
        data: Map<String, Value>,
    ) -> Interrupt {
        let body = error_body(status, message, data);
        self.halt(status, body)
    }

    /// Halt with a fault's message, plus its backtrace when the settings
    /// expose backtraces
    pub fn fault_error(&mut self, status: StatusCode, fault: &Fault) -> Interrupt {
        let data = self.fault_data(fault);
        self.error_with(status, Some(fault.message()), data)
    }

    /// Halt with a status and no body
    pub fn head(&mut self, status: StatusCode) -> Interrupt {
        self.halt(status, Value::Null)
    }

    /// Halt with a redirect to `location`
    pub fn redirect(&mut self, status: StatusCode, location: &str) -> Interrupt {
        if let Ok(value) = HeaderValue::from_str(location) {
            self.headers.insert(LOCATION, value);
        }
        self.halt(status, Value::Null)
    }

    /// Halt with 401 and a basic-auth challenge
    pub fn unauthorized(&mut self, realm: &str) -> Interrupt {
        let challenge = format!("Basic realm=\"{}\"", realm.replace('"', "\\\""));
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            self.headers.insert(WWW_AUTHENTICATE, value);
        }
        self.error(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}

#[cfg(test)]
impl Endpoint {
    pub(crate) fn detached() -> Self {
        let plan = EndpointPlan::compile(
            "/",
            &ConfigFrame::new(),
            Map::new(),
            handler_fn(|_| Ok(Value::Null)),
            HelperTable::new(),
            Settings::default(),
        )
        .expect("empty plan compiles");
        let negotiated =
            crate::negotiation::ContentNegotiator::default().negotiate(None, "/", &HashMap::new());
        Self::new(
            Arc::new(plan),
            Arc::new(Request::new(crate::dispatcher::Method::Get, "/")),
            negotiated,
            Map::new(),
        )
    }
}
