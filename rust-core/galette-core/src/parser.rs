//! # Body Parsers
//!
//! Decode request bodies by media type. The endpoint only consults a parser
//! for media types its scope `parses`.

use crate::error::{Error, Result};
use crate::json::parse_json;
use crate::request::url_decode;
use serde_json::{Map, Value};

/// Media type of JSON bodies
pub const JSON: &str = "application/json";
/// Media type of URL-encoded form bodies
pub const FORM: &str = "application/x-www-form-urlencoded";

/// Decodes a request body
pub trait Parser: Send + Sync {
    /// Parse a body
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedBody` when the body cannot be decoded.
    fn parse(&self, body: &[u8]) -> Result<Value>;

    /// Body kind used in `Invalid <name>` messages
    fn name(&self) -> &'static str;
}

/// JSON parser backed by simd-json
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn parse(&self, body: &[u8]) -> Result<Value> {
        parse_json(body)
    }

    fn name(&self) -> &'static str {
        "JSON"
    }
}

/// `application/x-www-form-urlencoded` parser
///
/// Produces a flat object of strings; repeated keys keep the last value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormParser;

impl Parser for FormParser {
    fn parse(&self, body: &[u8]) -> Result<Value> {
        let text = std::str::from_utf8(body).map_err(|e| Error::MalformedBody {
            kind: "form".to_string(),
            reason: e.to_string(),
        })?;
        let fields: Map<String, Value> = text
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (url_decode(key), Value::String(url_decode(value)))
            })
            .collect();
        Ok(Value::Object(fields))
    }

    fn name(&self) -> &'static str {
        "form"
    }
}
