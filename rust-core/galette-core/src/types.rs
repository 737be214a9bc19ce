//! # Typed Path Parameters
//!
//! Shorthand constraints for named path segments.
//!
//! A segment constrained by a [`ParamType`] only matches text of that type,
//! and its captured value is converted before it reaches the endpoint's
//! params (`/users/:id` with `id: ParamType::Int` yields `{"id": 42}`).

use crate::error::{Error, Result};
use serde_json::Value;
use std::fmt;

/// Supported path parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamType {
    /// String type (default) - no conversion
    #[default]
    String,
    /// Integer type - parses to i64
    Int,
    /// Float type - parses to f64
    Float,
    /// Boolean type - parses "true"/"false" or "1"/"0"
    Bool,
}

impl ParamType {
    /// Parse a type specifier (e.g., "int", "float")
    #[must_use]
    pub fn from_specifier(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "int" | "integer" | "i64" => Self::Int,
            "float" | "f64" | "number" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            _ => Self::String,
        }
    }

    /// Get the type name for error messages
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }

    /// Regex source matching one segment of this type, or `None` for the
    /// default segment pattern
    #[must_use]
    pub const fn pattern(&self) -> Option<&'static str> {
        match self {
            Self::String => None,
            Self::Int => Some(r"-?\d+"),
            Self::Float => Some(r"-?\d+(?:\.\d+)?"),
            Self::Bool => Some(r"(?i:true|false|1|0|yes|no)"),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Convert raw segment text to a JSON value based on `ParamType`
///
/// # Errors
///
/// Returns `Error::InvalidRoutePattern` if conversion fails.
pub fn convert_param(raw: &str, param_type: ParamType) -> Result<Value> {
    match param_type {
        ParamType::String => Ok(Value::String(raw.to_string())),
        ParamType::Int => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| Error::InvalidRoutePattern {
                pattern: raw.to_string(),
                reason: format!("Cannot convert '{raw}' to integer"),
            }),
        ParamType::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| Error::InvalidRoutePattern {
                pattern: raw.to_string(),
                reason: format!("Cannot convert '{raw}' to float"),
            }),
        ParamType::Bool => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(Error::InvalidRoutePattern {
                pattern: raw.to_string(),
                reason: format!("Cannot convert '{raw}' to boolean"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_type_from_specifier() {
        assert_eq!(ParamType::from_specifier("int"), ParamType::Int);
        assert_eq!(ParamType::from_specifier("INT"), ParamType::Int);
        assert_eq!(ParamType::from_specifier("integer"), ParamType::Int);
        assert_eq!(ParamType::from_specifier("float"), ParamType::Float);
        assert_eq!(ParamType::from_specifier("bool"), ParamType::Bool);
        assert_eq!(ParamType::from_specifier("unknown"), ParamType::String);
    }

    #[test]
    fn test_convert_string() {
        assert_eq!(convert_param("hello", ParamType::String).unwrap(), json!("hello"));
    }

    #[test]
    fn test_convert_int() {
        assert_eq!(convert_param("123", ParamType::Int).unwrap(), json!(123));
        assert_eq!(convert_param("-456", ParamType::Int).unwrap(), json!(-456));
        assert!(convert_param("abc", ParamType::Int).is_err());
    }

    #[test]
    fn test_convert_float() {
        assert_eq!(convert_param("2.5", ParamType::Float).unwrap(), json!(2.5));
    }

    #[test]
    fn test_convert_bool() {
        assert_eq!(convert_param("true", ParamType::Bool).unwrap(), json!(true));
        assert_eq!(convert_param("0", ParamType::Bool).unwrap(), json!(false));
        assert!(convert_param("maybe", ParamType::Bool).is_err());
    }

    #[test]
    fn test_patterns() {
        assert_eq!(ParamType::String.pattern(), None);
        let int = regex::Regex::new(&format!("^{}$", ParamType::Int.pattern().unwrap())).unwrap();
        assert!(int.is_match("42"));
        assert!(!int.is_match("4.2"));
    }
}
