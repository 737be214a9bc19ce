//! # JSON Codec
//!
//! Request bodies are decoded with simd-json; responses are encoded with
//! serde_json.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

fn malformed(reason: impl ToString) -> Error {
    Error::MalformedBody {
        kind: "JSON".to_string(),
        reason: reason.to_string(),
    }
}

/// Parse JSON bytes to a typed value using simd-json
///
/// simd-json parses in place, so the input is copied into a scratch
/// buffer first.
///
/// # Errors
///
/// Returns `Error::MalformedBody` if parsing fails
pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut scratch = bytes.to_vec();
    parse_json_bytes(&mut scratch)
}

/// Parse JSON from a mutable buffer without copying
///
/// # Errors
///
/// Returns `Error::MalformedBody` if parsing fails
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T> {
    simd_json::from_slice(bytes).map_err(malformed)
}

/// Serialize a value to JSON bytes
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be represented as JSON
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Signup {
        name: String,
        age: i32,
    }

    #[test]
    fn test_parse_json_object() {
        let data: Signup = parse_json(br#"{"name": "Ada", "age": 36}"#).unwrap();
        assert_eq!(data.name, "Ada");
        assert_eq!(data.age, 36);
    }

    #[test]
    fn test_parse_json_value() {
        let value: Value = parse_json(br#"{"tags": ["a", "b"], "n": 1.5}"#).unwrap();
        assert_eq!(value, json!({"tags": ["a", "b"], "n": 1.5}));
    }

    #[test]
    fn test_invalid_json() {
        let err = parse_json::<Value>(b"{not json").unwrap_err();
        assert!(matches!(err, Error::MalformedBody { ref kind, .. } if kind == "JSON"));
    }

    #[test]
    fn test_to_json() {
        let bytes = to_json(&Signup {
            name: "Bob".to_string(),
            age: 40,
        })
        .unwrap();
        assert_eq!(bytes, br#"{"name":"Bob","age":40}"#);
    }
}
