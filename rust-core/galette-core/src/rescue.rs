//! # Rescue Registry
//!
//! Maps error classes to handlers and picks the most specific handler for
//! a raised [`Fault`].
//!
//! ## Resolution
//!
//! Among registered classes the fault's class *is-a*, the one closest to
//! the fault's own class in its ancestor chain wins. Equal distances go to
//! the most recently registered entry, so a nested scope re-registering a
//! class overrides its parent.

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::fault::{ErrorClass, Fault, HandlerResult};
use crate::helpers::HelperTable;
use hyper::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Closure rescue handler
pub type RescueFn = Arc<dyn Fn(&mut Endpoint, &Fault) -> HandlerResult + Send + Sync>;

fn rescue_fn<F>(f: F) -> RescueFn
where
    F: Fn(&mut Endpoint, &Fault) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How a rescued fault is handled
#[derive(Clone)]
pub enum RescueHandler {
    /// Closure over the endpoint and the fault
    Inline(RescueFn),
    /// Helper called with the fault's class name and message
    Method(String),
    /// Respond with a status and `{"error": {"message": ...}}`, plus the
    /// backtrace where settings expose it
    Status(StatusCode),
}

impl RescueHandler {
    /// Closure handler
    pub fn inline<F>(f: F) -> Self
    where
        F: Fn(&mut Endpoint, &Fault) -> HandlerResult + Send + Sync + 'static,
    {
        Self::Inline(Arc::new(f))
    }

    /// Helper handler
    pub fn method(name: impl Into<String>) -> Self {
        Self::Method(name.into())
    }

    /// Status handler
    #[must_use]
    pub const fn status(status: StatusCode) -> Self {
        Self::Status(status)
    }
}

impl fmt::Debug for RescueHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("Inline"),
            Self::Method(name) => write!(f, "Method({name})"),
            Self::Status(status) => write!(f, "Status({})", status.as_u16()),
        }
    }
}

/// A declared `rescue_from`
#[derive(Debug, Clone)]
pub struct RescueEntry {
    /// Class handled, descendants included
    pub class: &'static ErrorClass,
    /// Handler
    pub handler: RescueHandler,
}

impl RescueEntry {
    /// Entry for a class
    #[must_use]
    pub const fn new(class: &'static ErrorClass, handler: RescueHandler) -> Self {
        Self { class, handler }
    }
}

/// Class-to-handler table with most-specific resolution
#[derive(Clone)]
pub struct RescueRegistry<H> {
    entries: Vec<(&'static ErrorClass, H)>,
}

impl<H> Default for RescueRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H> fmt::Debug for RescueRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(class, _)| class.name()))
            .finish()
    }
}

impl<H> RescueRegistry<H> {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a class
    pub fn register(&mut self, class: &'static ErrorClass, handler: H) {
        self.entries.push((class, handler));
    }

    /// Most specific handler for a raised class
    #[must_use]
    pub fn resolve(&self, raised: &ErrorClass) -> Option<&H> {
        let mut best: Option<(usize, &H)> = None;
        for (class, handler) in &self.entries {
            if let Some(distance) = raised.distance_to(class) {
                if best.map_or(true, |(closest, _)| distance <= closest) {
                    best = Some((distance, handler));
                }
            }
        }
        best.map(|(_, handler)| handler)
    }

    /// Number of registrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry with handlers resolved to closures
pub type CompiledRescues = RescueRegistry<RescueFn>;

/// Resolve declared entries against a route's helpers
///
/// # Errors
///
/// Returns `Error::UnknownHelper` when a method handler names a helper the
/// table does not contain.
pub fn compile(entries: &[RescueEntry], helpers: &HelperTable, route: &str) -> Result<CompiledRescues> {
    let mut registry = RescueRegistry::new();
    for entry in entries {
        let handler = match &entry.handler {
            RescueHandler::Inline(f) => f.clone(),
            RescueHandler::Method(name) => {
                let helper = helpers.get(name).cloned().ok_or_else(|| Error::UnknownHelper {
                    name: name.clone(),
                    route: route.to_string(),
                })?;
                rescue_fn(move |ep, fault| {
                    let args = [
                        Value::from(fault.class().name()),
                        Value::from(fault.message()),
                    ];
                    helper(ep, &args)
                })
            }
            RescueHandler::Status(status) => {
                let status = *status;
                rescue_fn(move |ep, fault| Err(ep.fault_error(status, fault)))
            }
        };
        registry.register(entry.class, handler);
    }
    Ok(registry)
}
