//! # Callback Chain
//!
//! Before, around and after filters with `when`/`unless` guards, composed
//! once per route into a single invocation.
//!
//! Given `before A; before B; around C; after D` and a handler `H`, the
//! composed chain runs `A, B, C-pre, H, C-post, D`. Filters declared in outer
//! scopes come first in the list and therefore run outside inner ones.
//!
//! A filter short-circuits the chain by returning an [`Interrupt`]: a halt
//! or a fault. After filters run separately, so they still run when the
//! chain was interrupted.

use crate::endpoint::{Endpoint, HandlerFn};
use crate::error::{Error, Result};
use crate::fault::{HandlerResult, Interrupt};
use crate::helpers::HelperTable;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Closure filter run against the endpoint
pub type FilterFn = Arc<dyn Fn(&mut Endpoint) -> HandlerResult + Send + Sync>;

/// Closure wrapping the rest of the chain
pub type AroundFn = Arc<dyn Fn(&mut Endpoint, Next<'_>) -> HandlerResult + Send + Sync>;

/// Closure guard
pub type Predicate = Arc<dyn Fn(&Endpoint) -> bool + Send + Sync>;

type Guard = Arc<dyn Fn(&mut Endpoint) -> std::result::Result<bool, Interrupt> + Send + Sync>;

fn filter_fn<F>(f: F) -> FilterFn
where
    F: Fn(&mut Endpoint) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

fn around_fn<F>(f: F) -> AroundFn
where
    F: Fn(&mut Endpoint, Next<'_>) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

fn guard_fn<F>(f: F) -> Guard
where
    F: Fn(&mut Endpoint) -> std::result::Result<bool, Interrupt> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn pass_through(_: &mut Endpoint) -> HandlerResult {
    Ok(Value::Null)
}

/// The rest of the chain, handed to around filters
#[derive(Clone, Copy)]
pub struct Next<'a> {
    unit: &'a (dyn Fn(&mut Endpoint) -> HandlerResult + Send + Sync),
}

impl<'a> Next<'a> {
    fn new(unit: &'a (dyn Fn(&mut Endpoint) -> HandlerResult + Send + Sync)) -> Self {
        Self { unit }
    }

    /// Run the rest of the chain
    ///
    /// # Errors
    ///
    /// Propagates halts and faults from inner filters and the handler.
    pub fn run(self, endpoint: &mut Endpoint) -> HandlerResult {
        (self.unit)(endpoint)
    }
}

/// Filter object with a fixed interface
pub trait EndpointFilter: Send + Sync {
    /// Run as a before or after filter
    ///
    /// # Errors
    ///
    /// Returns an interrupt to halt or fail the request.
    fn filter(&self, endpoint: &mut Endpoint) -> HandlerResult;

    /// Run as an around filter; defaults to filtering, then continuing
    ///
    /// # Errors
    ///
    /// Returns an interrupt to halt or fail the request.
    fn around(&self, endpoint: &mut Endpoint, next: Next<'_>) -> HandlerResult {
        self.filter(endpoint)?;
        next.run(endpoint)
    }
}

/// Callback phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the handler
    Before,
    /// Around the handler
    Around,
    /// After the response is rendered
    After,
}

/// What a callback invokes
#[derive(Clone)]
pub enum Filter {
    /// Closure run against the endpoint
    Inline(FilterFn),
    /// Closure wrapping the rest of the chain (around phase only)
    Wrap(AroundFn),
    /// Helper, looked up by name when the API is built; as an around filter
    /// it runs and then continues
    Method(String),
    /// Object implementing [`EndpointFilter`]
    Object(Arc<dyn EndpointFilter>),
}

impl Filter {
    /// Closure filter
    pub fn inline<F>(f: F) -> Self
    where
        F: Fn(&mut Endpoint) -> HandlerResult + Send + Sync + 'static,
    {
        Self::Inline(Arc::new(f))
    }

    /// Around closure
    pub fn wrap<F>(f: F) -> Self
    where
        F: Fn(&mut Endpoint, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        Self::Wrap(Arc::new(f))
    }

    /// Helper reference
    pub fn method(name: impl Into<String>) -> Self {
        Self::Method(name.into())
    }

    /// Filter object
    pub fn object<F: EndpointFilter + 'static>(filter: F) -> Self {
        Self::Object(Arc::new(filter))
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline"),
            Self::Wrap(_) => f.write_str("Wrap"),
            Self::Method(name) => write!(f, "Method({name})"),
            Self::Object(_) => f.write_str("Object"),
        }
    }
}

/// A callback guard
#[derive(Clone)]
pub enum Condition {
    /// Helper whose result is tested for truthiness
    Method(String),
    /// Closure over the endpoint
    Predicate(Predicate),
}

impl Condition {
    /// Helper condition
    pub fn method(name: impl Into<String>) -> Self {
        Self::Method(name.into())
    }

    /// Closure condition
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Endpoint) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(name) => write!(f, "Method({name})"),
            Self::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// `when`/`unless` guards; every `when` must hold and no `unless` may
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    when: Vec<Condition>,
    unless: Vec<Condition>,
}

impl Conditions {
    /// No guards
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a condition
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.when.push(condition);
        self
    }

    /// Skip when a condition holds
    #[must_use]
    pub fn unless(mut self, condition: Condition) -> Self {
        self.unless.push(condition);
        self
    }

    /// Whether there are no guards
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.when.is_empty() && self.unless.is_empty()
    }
}

/// One declared callback
#[derive(Debug, Clone)]
pub struct Callback {
    /// Phase
    pub phase: Phase,
    /// Filter
    pub filter: Filter,
    /// Guards
    pub conditions: Conditions,
}

impl Callback {
    /// Unguarded callback
    #[must_use]
    pub fn new(phase: Phase, filter: Filter) -> Self {
        Self {
            phase,
            filter,
            conditions: Conditions::default(),
        }
    }

    /// Attach guards
    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }
}

/// Whether a helper result counts as true
#[must_use]
pub const fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// A route's composed callbacks
#[derive(Clone)]
pub struct CompiledChain {
    unit: HandlerFn,
    after: Vec<HandlerFn>,
}

impl fmt::Debug for CompiledChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledChain")
            .field("after", &self.after.len())
            .finish_non_exhaustive()
    }
}

impl CompiledChain {
    /// Compose callbacks around a handler
    ///
    /// Helper references are resolved against `helpers` now, not per
    /// request.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownHelper` when a filter or condition names a
    /// helper the table does not contain.
    pub fn compile(
        callbacks: &[Callback],
        handler: HandlerFn,
        helpers: &HelperTable,
        route: &str,
    ) -> Result<Self> {
        let resolve_helper = |name: &str| {
            helpers.get(name).cloned().ok_or_else(|| Error::UnknownHelper {
                name: name.to_string(),
                route: route.to_string(),
            })
        };

        let mut befores = Vec::new();
        let mut arounds = Vec::new();
        let mut after = Vec::new();

        for callback in callbacks {
            let guard = compile_guard(&callback.conditions, &resolve_helper)?;
            match callback.phase {
                Phase::Around => {
                    let wrap: AroundFn = match &callback.filter {
                        Filter::Wrap(f) => f.clone(),
                        Filter::Object(object) => {
                            let object = object.clone();
                            around_fn(move |ep, next| object.around(ep, next))
                        }
                        Filter::Inline(f) => {
                            let f = f.clone();
                            around_fn(move |ep, next| {
                                f(ep)?;
                                next.run(ep)
                            })
                        }
                        Filter::Method(name) => {
                            let helper = resolve_helper(name)?;
                            around_fn(move |ep, next| {
                                helper(ep, &[])?;
                                next.run(ep)
                            })
                        }
                    };
                    arounds.push((wrap, guard));
                }
                phase => {
                    let run: FilterFn = match &callback.filter {
                        Filter::Inline(f) => f.clone(),
                        Filter::Object(object) => {
                            let object = object.clone();
                            filter_fn(move |ep| object.filter(ep))
                        }
                        Filter::Method(name) => {
                            let helper = resolve_helper(name)?;
                            filter_fn(move |ep| helper(ep, &[]))
                        }
                        Filter::Wrap(f) => {
                            let f = f.clone();
                            filter_fn(move |ep| f(ep, Next::new(&pass_through)))
                        }
                    };
                    let guarded = guarded(run, guard);
                    if phase == Phase::Before {
                        befores.push(guarded);
                    } else {
                        after.push(guarded);
                    }
                }
            }
        }

        let mut unit = handler;
        for (wrap, guard) in arounds.into_iter().rev() {
            let inner = unit;
            unit = filter_fn(move |ep| {
                if check(guard.as_ref(), ep)? {
                    wrap(ep, Next::new(&*inner))
                } else {
                    inner(ep)
                }
            });
        }
        for before in befores.into_iter().rev() {
            let inner = unit;
            unit = filter_fn(move |ep| {
                before(ep)?;
                inner(ep)
            });
        }

        Ok(Self { unit, after })
    }

    /// Before filters, around filters and the handler, composed
    #[must_use]
    pub fn unit(&self) -> &HandlerFn {
        &self.unit
    }

    /// After filters in declaration order
    #[must_use]
    pub fn after(&self) -> &[HandlerFn] {
        &self.after
    }
}

fn compile_guard(
    conditions: &Conditions,
    resolve_helper: &impl Fn(&str) -> Result<crate::helpers::HelperFn>,
) -> Result<Option<Guard>> {
    if conditions.is_empty() {
        return Ok(None);
    }
    let mut checks: Vec<(Guard, bool)> = Vec::new();
    for (condition, expected) in conditions
        .when
        .iter()
        .map(|c| (c, true))
        .chain(conditions.unless.iter().map(|c| (c, false)))
    {
        let check: Guard = match condition {
            Condition::Method(name) => {
                let helper = resolve_helper(name)?;
                guard_fn(move |ep| Ok(truthy(&helper(ep, &[])?)))
            }
            Condition::Predicate(predicate) => {
                let predicate = predicate.clone();
                guard_fn(move |ep| Ok(predicate(ep)))
            }
        };
        checks.push((check, expected));
    }
    Ok(Some(guard_fn(move |ep| {
        for (check, expected) in &checks {
            if check(ep)? != *expected {
                return Ok(false);
            }
        }
        Ok(true)
    })))
}

fn check(guard: Option<&Guard>, ep: &mut Endpoint) -> std::result::Result<bool, Interrupt> {
    guard.map_or(Ok(true), |guard| guard(ep))
}

fn guarded(run: FilterFn, guard: Option<Guard>) -> HandlerFn {
    match guard {
        None => run,
        Some(guard) => filter_fn(move |ep| {
            if guard(ep)? {
                run(ep)
            } else {
                Ok(Value::Null)
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::helpers::HelperFn;
    use serde_json::json;
    use std::collections::HashMap;

    fn log(ep: &mut Endpoint, entry: &str) {
        let mut trail = ep.local("trail").cloned().unwrap_or_else(|| json!([]));
        if let Some(items) = trail.as_array_mut() {
            items.push(json!(entry));
        }
        ep.set_local("trail", trail);
    }

    fn trail(ep: &Endpoint) -> Vec<String> {
        ep.local("trail")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }

    fn handler() -> HandlerFn {
        Arc::new(|ep: &mut Endpoint| {
            log(ep, "H");
            Ok(json!("done"))
        })
    }

    fn run(chain: &CompiledChain) -> (Endpoint, HandlerResult) {
        let mut ep = Endpoint::detached();
        let result = (chain.unit())(&mut ep);
        for after in chain.after() {
            let _ = after(&mut ep);
        }
        (ep, result)
    }

    #[test]
    fn test_ordering() {
        let callbacks = vec![
            Callback::new(Phase::Before, Filter::inline(|ep| { log(ep, "A"); Ok(Value::Null) })),
            Callback::new(Phase::Before, Filter::inline(|ep| { log(ep, "B"); Ok(Value::Null) })),
            Callback::new(
                Phase::Around,
                Filter::wrap(|ep, next| {
                    log(ep, "C-pre");
                    let result = next.run(ep);
                    log(ep, "C-post");
                    result
                }),
            ),
            Callback::new(Phase::After, Filter::inline(|ep| { log(ep, "D"); Ok(Value::Null) })),
        ];
        let chain = CompiledChain::compile(&callbacks, handler(), &HashMap::new(), "/").unwrap();
        let (ep, result) = run(&chain);
        assert_eq!(result.unwrap(), json!("done"));
        assert_eq!(trail(&ep), ["A", "B", "C-pre", "H", "C-post", "D"]);
    }

    #[test]
    fn test_outer_around_wraps_inner() {
        let around = |name: &'static str| {
            Callback::new(
                Phase::Around,
                Filter::wrap(move |ep, next| {
                    log(ep, &format!("{name}<"));
                    let result = next.run(ep);
                    log(ep, &format!(">{name}"));
                    result
                }),
            )
        };
        let chain =
            CompiledChain::compile(&[around("outer"), around("inner")], handler(), &HashMap::new(), "/")
                .unwrap();
        let (ep, _) = run(&chain);
        assert_eq!(trail(&ep), ["outer<", "inner<", "H", ">inner", ">outer"]);
    }

    #[test]
    fn test_halt_skips_rest_but_not_after() {
        let callbacks = vec![
            Callback::new(
                Phase::Before,
                Filter::inline(|ep| Err(ep.halt(hyper::StatusCode::FORBIDDEN, json!("stop")))),
            ),
            Callback::new(Phase::After, Filter::inline(|ep| { log(ep, "D"); Ok(Value::Null) })),
        ];
        let chain = CompiledChain::compile(&callbacks, handler(), &HashMap::new(), "/").unwrap();
        let (ep, result) = run(&chain);
        assert!(result.unwrap_err().is_halt());
        assert_eq!(trail(&ep), ["D"]);
    }

    #[test]
    fn test_failed_condition_skips_before_and_around_still_continues() {
        let callbacks = vec![
            Callback::new(Phase::Before, Filter::inline(|ep| { log(ep, "A"); Ok(Value::Null) }))
                .with_conditions(Conditions::new().when(Condition::predicate(|_| false))),
            Callback::new(
                Phase::Around,
                Filter::wrap(|ep, next| {
                    log(ep, "C");
                    next.run(ep)
                }),
            )
            .with_conditions(Conditions::new().unless(Condition::predicate(|_| true))),
        ];
        let chain = CompiledChain::compile(&callbacks, handler(), &HashMap::new(), "/").unwrap();
        let (ep, result) = run(&chain);
        assert!(result.is_ok());
        assert_eq!(trail(&ep), ["H"]);
    }

    #[test]
    fn test_method_filters_and_conditions() {
        let mut helpers: HelperTable = HashMap::new();
        let audit: HelperFn = Arc::new(|ep: &mut Endpoint, _: &[Value]| {
            log(ep, "audit");
            Ok(Value::Null)
        });
        let enabled: HelperFn = Arc::new(|_: &mut Endpoint, _: &[Value]| Ok(json!(true)));
        helpers.insert("audit".to_string(), audit);
        helpers.insert("enabled".to_string(), enabled);

        let callbacks = vec![Callback::new(Phase::Before, Filter::method("audit"))
            .with_conditions(Conditions::new().when(Condition::method("enabled")))];
        let chain = CompiledChain::compile(&callbacks, handler(), &helpers, "/").unwrap();
        let (ep, _) = run(&chain);
        assert_eq!(trail(&ep), ["audit", "H"]);
    }

    #[test]
    fn test_unknown_helper_is_build_error() {
        let callbacks = vec![Callback::new(Phase::Before, Filter::method("missing"))];
        let err = CompiledChain::compile(&callbacks, handler(), &HashMap::new(), "/users").err();
        assert!(matches!(err, Some(Error::UnknownHelper { ref name, .. }) if name == "missing"));
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(false)));
        assert!(truthy(&json!(0)));
        assert!(truthy(&json!("")));
    }
}
