//! # Renderers
//!
//! Turn a handler's value into response bytes for a negotiated format.

use crate::error::Result;
use crate::format::Format;
use crate::json::to_json;
use hyper::body::Bytes;
use serde_json::Value;

/// Encodes handler values for one or more formats
pub trait Renderer: Send + Sync {
    /// Render a value
    ///
    /// # Errors
    ///
    /// Returns an error when the value cannot be encoded.
    fn render(&self, value: &Value, format: &Format) -> Result<Bytes>;
}

/// Default renderer
///
/// - `null` renders as an empty body
/// - strings render as their raw text, whatever the format
/// - anything else renders as JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimpleRenderer;

impl Renderer for SimpleRenderer {
    fn render(&self, value: &Value, _format: &Format) -> Result<Bytes> {
        match value {
            Value::Null => Ok(Bytes::new()),
            Value::String(text) => Ok(Bytes::from(text.clone())),
            other => Ok(Bytes::from(to_json(other)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_object_as_json() {
        let body = SimpleRenderer.render(&json!({"name": "a"}), &Format::json()).unwrap();
        assert_eq!(&body[..], br#"{"name":"a"}"#);
    }

    #[test]
    fn test_render_string_raw() {
        let body = SimpleRenderer.render(&json!("hello"), &Format::named("txt")).unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[test]
    fn test_render_null_empty() {
        assert!(SimpleRenderer.render(&Value::Null, &Format::json()).unwrap().is_empty());
    }
}
