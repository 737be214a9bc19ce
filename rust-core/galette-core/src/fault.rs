//! # Faults and Halts
//!
//! Request-time control flow for handlers, filters and rescue handlers.
//!
//! A handler either produces a value, halts early with a prepared payload
//! ([`Halt`]), or raises a [`Fault`]. Faults carry an [`ErrorClass`]: a node
//! in a static single-inheritance hierarchy that the rescue registry walks to
//! find the most specific handler.

use serde_json::Value;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

/// A named exception class with an optional parent
///
/// Classes are declared as `static` values so that rescue resolution can
/// walk the ancestor chain without allocation:
///
/// ```ignore
/// static RECORD_NOT_FOUND: ErrorClass = ErrorClass::new("RecordNotFound", &STANDARD_ERROR);
/// ```
///
/// Class identity is the name; names must be unique within an application.
#[derive(Debug)]
pub struct ErrorClass {
    name: &'static str,
    parent: Option<&'static ErrorClass>,
}

impl ErrorClass {
    /// Declare a root class
    #[must_use]
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Declare a class deriving from `parent`
    #[must_use]
    pub const fn new(name: &'static str, parent: &'static ErrorClass) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    /// Class name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Parent class, if any
    #[must_use]
    pub const fn parent(&self) -> Option<&'static ErrorClass> {
        self.parent
    }

    /// Number of steps from `self` up to `ancestor`
    ///
    /// `Some(0)` when the classes are the same, `None` when `ancestor` is
    /// not in the chain.
    #[must_use]
    pub fn distance_to(&self, ancestor: &ErrorClass) -> Option<usize> {
        if self == ancestor {
            return Some(0);
        }
        let mut depth = 1;
        let mut current = self.parent;
        while let Some(class) = current {
            if class == ancestor {
                return Some(depth);
            }
            depth += 1;
            current = class.parent;
        }
        None
    }

    /// Whether `self` is `other` or derives from it
    #[must_use]
    pub fn is_a(&self, other: &ErrorClass) -> bool {
        self.distance_to(other).is_some()
    }
}

impl PartialEq for ErrorClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ErrorClass {}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Root of the built-in hierarchy
pub static STANDARD_ERROR: ErrorClass = ErrorClass::root("StandardError");
/// Generic runtime failure; foreign errors converted with `?` land here
pub static RUNTIME_ERROR: ErrorClass = ErrorClass::new("RuntimeError", &STANDARD_ERROR);
/// Bad argument to a helper or handler
pub static ARGUMENT_ERROR: ErrorClass = ErrorClass::new("ArgumentError", &STANDARD_ERROR);
/// Call to a helper that no enclosing scope declares
pub static NAME_ERROR: ErrorClass = ErrorClass::new("NameError", &STANDARD_ERROR);
/// Lookup of a missing key
pub static INDEX_ERROR: ErrorClass = ErrorClass::new("IndexError", &STANDARD_ERROR);
/// A required parameter is absent or not an object
pub static PARAMETER_MISSING: ErrorClass = ErrorClass::new("ParameterMissing", &INDEX_ERROR);
/// Parameters contain keys outside the permitted set
pub static PARAMETER_INVALID: ErrorClass = ErrorClass::new("ParameterInvalid", &STANDARD_ERROR);

/// A runtime fault raised while handling a request
///
/// Not a `std::error::Error` itself, so any error type converts into it
/// with `?`.
pub struct Fault {
    class: &'static ErrorClass,
    message: String,
    source: Option<anyhow::Error>,
    backtrace: Backtrace,
}

impl Fault {
    /// Raise a fault of the given class
    #[must_use]
    pub fn new(class: &'static ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            source: None,
            backtrace: Backtrace::capture(),
        }
    }

    /// Raise a fault of the given class wrapping an underlying error
    #[must_use]
    pub fn with_source<E>(class: &'static ErrorClass, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            class,
            message: error.to_string(),
            source: Some(anyhow::Error::new(error)),
            backtrace: Backtrace::capture(),
        }
    }

    /// The fault's class
    #[must_use]
    pub const fn class(&self) -> &'static ErrorClass {
        self.class
    }

    /// Human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Underlying error, when the fault wraps one
    #[must_use]
    pub const fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    /// Downcast the underlying error
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.source
            .as_ref()
            .and_then(|source| source.downcast_ref::<E>())
    }

    /// Backtrace frames as lines, empty unless capture is enabled
    /// (`RUST_BACKTRACE`/`RUST_LIB_BACKTRACE`)
    #[must_use]
    pub fn backtrace_lines(&self) -> Vec<String> {
        if self.backtrace.status() != BacktraceStatus::Captured {
            return Vec::new();
        }
        self.backtrace
            .to_string()
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("class", &self.class.name)
            .field("message", &self.message)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class.name, self.message)
    }
}

impl<E> From<E> for Fault
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::with_source(&RUNTIME_ERROR, error)
    }
}

/// Early exit carrying the payload to render
///
/// The status code has already been applied to the endpoint by the time a
/// halt is produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Halt {
    body: Value,
}

impl Halt {
    /// Halt with a body
    #[must_use]
    pub const fn new(body: Value) -> Self {
        Self { body }
    }

    /// Halt payload
    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }

    /// Consume into the payload
    #[must_use]
    pub fn into_body(self) -> Value {
        self.body
    }
}

/// Non-value outcome of a handler, filter or helper
#[derive(Debug)]
pub enum Interrupt {
    /// Stop the current phase and respond with this payload
    Halt(Halt),
    /// Runtime fault, resolved through the rescue registry
    Fault(Fault),
}

impl Interrupt {
    /// Whether this is a halt
    #[must_use]
    pub const fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

impl From<Fault> for Interrupt {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

impl From<Halt> for Interrupt {
    fn from(halt: Halt) -> Self {
        Self::Halt(halt)
    }
}

impl<E> From<E> for Interrupt
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::Fault(Fault::from(error))
    }
}

/// Result of a handler, filter, helper or rescue handler
pub type HandlerResult = std::result::Result<Value, Interrupt>;

#[cfg(test)]
mod tests {
    use super::*;

    static RECORD_NOT_FOUND: ErrorClass = ErrorClass::new("RecordNotFound", &RUNTIME_ERROR);

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(RUNTIME_ERROR.distance_to(&RUNTIME_ERROR), Some(0));
    }

    #[test]
    fn test_distance_walks_ancestors() {
        assert_eq!(RECORD_NOT_FOUND.distance_to(&RUNTIME_ERROR), Some(1));
        assert_eq!(RECORD_NOT_FOUND.distance_to(&STANDARD_ERROR), Some(2));
        assert_eq!(RECORD_NOT_FOUND.distance_to(&ARGUMENT_ERROR), None);
    }

    #[test]
    fn test_is_a() {
        assert!(PARAMETER_MISSING.is_a(&INDEX_ERROR));
        assert!(PARAMETER_MISSING.is_a(&STANDARD_ERROR));
        assert!(!STANDARD_ERROR.is_a(&PARAMETER_MISSING));
    }

    #[test]
    fn test_foreign_error_becomes_runtime_fault() {
        fn parse(raw: &str) -> Result<i64, Fault> {
            Ok(raw.parse::<i64>()?)
        }
        let fault = parse("abc").unwrap_err();
        assert_eq!(fault.class(), &RUNTIME_ERROR);
        assert!(fault.downcast_ref::<std::num::ParseIntError>().is_some());
        assert!(fault.message().contains("invalid digit"));
    }

    #[test]
    fn test_question_mark_into_interrupt() {
        fn handler() -> HandlerResult {
            let n: i64 = "12x".parse()?;
            Ok(Value::from(n))
        }
        match handler() {
            Err(Interrupt::Fault(fault)) => assert_eq!(fault.class().name(), "RuntimeError"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        let fault = Fault::new(&ARGUMENT_ERROR, "bad id");
        assert_eq!(fault.to_string(), "ArgumentError: bad id");
    }

    #[test]
    fn test_halt_is_halt() {
        let interrupt = Interrupt::from(Halt::new(Value::Null));
        assert!(interrupt.is_halt());
    }
}
