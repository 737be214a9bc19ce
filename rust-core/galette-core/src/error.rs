//! # Error Handling
//!
//! Build-time and transport errors for galette core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Request-time failures raised by handlers and filters are not errors in
//! this sense; see [`crate::fault`].

use thiserror::Error;

/// Result type alias for galette build and transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the galette runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A filter, condition or rescue handler names a helper that no
    /// enclosing scope declares
    #[error("Unknown helper `{name}` referenced by route {route}")]
    UnknownHelper {
        /// The helper name
        name: String,
        /// The route template that referenced it
        route: String,
    },

    /// Request body could not be decoded
    #[error("Malformed {kind} body: {reason}")]
    MalformedBody {
        /// Body kind (`JSON`, `form`)
        kind: String,
        /// Decoder message
        reason: String,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_error() {
        let err = Error::InvalidRoutePattern {
            pattern: "/users/(:id".to_string(),
            reason: "unbalanced group".to_string(),
        };
        assert!(err.to_string().contains("/users/(:id"));
        assert!(err.to_string().contains("unbalanced"));
    }

    #[test]
    fn test_unknown_helper_error() {
        let err = Error::UnknownHelper {
            name: "current_user".to_string(),
            route: "/admin(.:format)".to_string(),
        };
        assert!(err.to_string().contains("current_user"));
        assert!(err.to_string().contains("/admin"));
    }

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:8000".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:8000"));
    }
}
