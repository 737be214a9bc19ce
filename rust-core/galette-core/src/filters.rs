//! # Stock Filters
//!
//! Filter objects installed through `Api::basic_auth` and
//! `Api::after_with(Filter::object(Jsonp::new()), ..)`.

use crate::callbacks::EndpointFilter;
use crate::endpoint::Endpoint;
use crate::fault::HandlerResult;
use hyper::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Credential check: endpoint, user, password
pub type CredentialCheck = Arc<dyn Fn(&Endpoint, &str, &str) -> bool + Send + Sync>;

/// HTTP basic authentication, as a before filter
///
/// Halts with 401 and a `WWW-Authenticate` challenge unless the request
/// carries credentials the check accepts.
#[derive(Clone)]
pub struct BasicAuth {
    realm: String,
    check: CredentialCheck,
}

impl BasicAuth {
    /// Filter for a realm
    pub fn new<F>(realm: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Endpoint, &str, &str) -> bool + Send + Sync + 'static,
    {
        Self {
            realm: realm.into(),
            check: Arc::new(check),
        }
    }

    /// Realm named in the challenge
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl EndpointFilter for BasicAuth {
    fn filter(&self, endpoint: &mut Endpoint) -> HandlerResult {
        let authorized = endpoint
            .request()
            .credentials()
            .is_some_and(|(user, password)| (self.check)(endpoint, &user, &password));
        if authorized {
            Ok(Value::Null)
        } else {
            Err(endpoint.unauthorized(&self.realm))
        }
    }
}

/// JSON-to-JSONP conversion, as an after filter
///
/// When the format is JSON and the callback parameter is present, the body
/// becomes `callback(body);` served as JavaScript with status 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jsonp {
    parameter: String,
}

impl Default for Jsonp {
    fn default() -> Self {
        Self {
            parameter: "callback".to_string(),
        }
    }
}

impl Jsonp {
    /// Filter reading the `callback` parameter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the callback name from another parameter
    #[must_use]
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = parameter.into();
        self
    }
}

impl EndpointFilter for Jsonp {
    fn filter(&self, endpoint: &mut Endpoint) -> HandlerResult {
        if endpoint.format().map_or(true, |format| format.name() != "json") {
            return Ok(Value::Null);
        }
        let Some(callback) = endpoint
            .param(&self.parameter)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            return Ok(Value::Null);
        };

        let body = format!("{callback}({});", String::from_utf8_lossy(endpoint.body()));
        endpoint.set_status(StatusCode::OK);
        endpoint.set_header("Content-Type", "application/javascript; charset=utf-8");
        endpoint.set_body(body);
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Api;
    use crate::callbacks::{Conditions, Filter};
    use crate::dispatcher::Method;
    use crate::request::Request;
    use serde_json::json;

    fn api() -> Api {
        let mut api = Api::new();
        api.basic_auth("admin", |_, user, password| user == "ada" && password == "secret");
        api.after_with(Filter::object(Jsonp::new()), Conditions::new());
        api.get("/report", |_| Ok(json!({"ok": true})));
        api
    }

    #[test]
    fn test_basic_auth_rejects_missing_credentials() {
        let dispatcher = api().build().unwrap();
        let response = dispatcher.serve(Request::new(Method::Get, "/report"));
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.header("www-authenticate"), Some("Basic realm=\"admin\""));
    }

    #[test]
    fn test_basic_auth_accepts_valid_credentials() {
        let dispatcher = api().build().unwrap();
        // ada:secret
        let response = dispatcher.serve(
            Request::new(Method::Get, "/report").with_header("Authorization", "Basic YWRhOnNlY3JldA=="),
        );
        assert_eq!(response.status, StatusCode::OK);
    }

    #[test]
    fn test_jsonp_wraps_body() {
        let dispatcher = api().build().unwrap();
        let response = dispatcher.serve(
            Request::new(Method::Get, "/report?callback=show")
                .with_header("Authorization", "Basic YWRhOnNlY3JldA=="),
        );
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("application/javascript; charset=utf-8"));
        assert_eq!(response.body_text(), r#"show({"ok":true});"#);
    }
}
