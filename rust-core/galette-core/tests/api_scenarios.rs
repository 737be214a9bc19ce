//! End-to-end scenarios through `Api::build` and `Dispatcher::serve`.

use galette_core::fault::RUNTIME_ERROR;
use galette_core::{
    Api, Conditions, Dispatcher, ErrorClass, Fault, Filter, Method, RescueHandler, Request,
    Response, Strategy, Versioning,
};
use hyper::StatusCode;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

static RECORD_NOT_FOUND: ErrorClass = ErrorClass::new("RecordNotFound", &RUNTIME_ERROR);

fn users_api() -> Dispatcher {
    let mut api = Api::new();
    api.respond_to(&["json"]);
    api.rescue_from(&RECORD_NOT_FOUND, RescueHandler::status(StatusCode::NOT_FOUND));
    api.namespace("users", |api| {
        api.get("/:name", |ep| {
            let name = ep.param("name").cloned().unwrap_or(Value::Null);
            if name == "ghost" {
                return Err(Fault::new(&RECORD_NOT_FOUND, "No such user").into());
            }
            Ok(json!({ "name": name }))
        });
        api.post("/", |ep| Ok(ep.params().require("user")?.into_value()));
    });
    api.build().unwrap()
}

fn body_json(response: &Response) -> Value {
    serde_json::from_slice(&response.body).unwrap()
}

#[test]
fn test_get_renders_json() {
    let response = users_api().serve(Request::new(Method::Get, "/users/a"));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type(), Some("application/json"));
    assert_eq!(response.body_text(), r#"{"name":"a"}"#);
}

#[test]
fn test_unacceptable_format_lists_accepts() {
    let response = users_api()
        .serve(Request::new(Method::Get, "/users/a").with_header("Accept", "application/xml"));
    assert_eq!(response.status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(body_json(&response)["error"]["accepts"], json!(["application/json"]));
}

#[test]
fn test_options_lists_allowed_methods() {
    let response = users_api().serve(Request::new(Method::Options, "/users"));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("allow"), Some("OPTIONS, POST"));
    assert_eq!(response.body_text(), "OPTIONS, POST");
}

#[test]
fn test_unrouted_method_is_405() {
    let response = users_api().serve(Request::new(Method::Delete, "/users/a"));
    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.header("allow"), Some("GET, HEAD, OPTIONS"));
}

#[test]
fn test_rescued_fault_uses_declared_status() {
    let response = users_api().serve(Request::new(Method::Get, "/users/ghost"));
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(body_json(&response)["error"]["message"], "No such user");
}

#[test]
fn test_json_body_merges_into_params() {
    let response = users_api().serve(
        Request::new(Method::Post, "/users")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"user": {"name": "ada"}}"#),
    );
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(body_json(&response), json!({"name": "ada"}));
}

#[test]
fn test_invalid_json_body_is_400() {
    let response = users_api().serve(
        Request::new(Method::Post, "/users")
            .with_header("Content-Type", "application/json")
            .with_body("{nope"),
    );
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(body_json(&response)["error"]["message"], "Invalid JSON");
}

#[test]
fn test_callback_order() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mut api = Api::new();
    let log = |trace: &Arc<Mutex<Vec<&'static str>>>, step| {
        let trace = trace.clone();
        move || trace.lock().unwrap().push(step)
    };

    let before = log(&trace, "before");
    api.before(move |_| {
        before();
        Ok(Value::Null)
    });
    let (enter, leave) = (log(&trace, "around in"), log(&trace, "around out"));
    api.around(move |ep, next| {
        enter();
        let value = next.run(ep);
        leave();
        value
    });
    let after = log(&trace, "after");
    api.after(move |_| {
        after();
        Ok(Value::Null)
    });
    let handler = log(&trace, "handler");
    api.get("/steps", move |_| {
        handler();
        Ok(json!("done"))
    });

    let response = api.build().unwrap().serve(Request::new(Method::Get, "/steps"));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        *trace.lock().unwrap(),
        ["before", "around in", "handler", "around out", "after"]
    );
}

#[test]
fn test_before_halt_skips_handler() {
    let mut api = Api::new();
    api.before_with(
        Filter::inline(|ep| Err(ep.halt(StatusCode::TOO_MANY_REQUESTS, json!({"slow": "down"})))),
        Conditions::new(),
    );
    api.get("/busy", |_| panic!("handler must not run"));

    let response = api.build().unwrap().serve(Request::new(Method::Get, "/busy"));
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(&response), json!({"slow": "down"}));
}

#[test]
fn test_header_versioning() {
    let mut api = Api::new();
    api.versioning(
        Versioning::new(Strategy::Header)
            .with_vendor("acme")
            .with_default("v3"),
    );
    api.version("v3", |api| {
        api.get("/status", |ep| Ok(json!({"version": ep.version()})));
    });
    api.version("v4", |api| {
        api.get("/status", |ep| Ok(json!({"version": ep.version()})));
    });
    let dispatcher = api.build().unwrap();

    let v4 = dispatcher.serve(
        Request::new(Method::Get, "/status").with_header("Accept", "application/vnd.acme-v4+json"),
    );
    assert_eq!(v4.status, StatusCode::OK);
    assert_eq!(body_json(&v4)["version"], "v4");

    let fallback = dispatcher.serve(Request::new(Method::Get, "/status"));
    assert_eq!(body_json(&fallback)["version"], "v3");

    let formatless = dispatcher.serve(
        Request::new(Method::Get, "/status").with_header("Accept", "application/vnd.acme-v4"),
    );
    assert_eq!(formatless.status, StatusCode::OK);
    assert_eq!(formatless.content_type(), Some("application/json"));
    assert_eq!(body_json(&formatless)["version"], "v4");

    let stranger = dispatcher.serve(
        Request::new(Method::Get, "/status").with_header("Accept", "application/vnd.other-v4+json"),
    );
    assert_eq!(stranger.status, StatusCode::NOT_ACCEPTABLE);
}

#[test]
fn test_query_versioning() {
    let mut api = Api::new();
    api.versioning(Versioning::new(Strategy::Query).with_default("v1"));
    api.version("v1", |api| {
        api.get("/ping", |_| Ok(json!("one")));
    });
    api.version("v2", |api| {
        api.get("/ping", |_| Ok(json!("two")));
    });
    let dispatcher = api.build().unwrap();

    assert_eq!(dispatcher.serve(Request::new(Method::Get, "/ping?v=v2")).body_text(), "\"two\"");
    assert_eq!(dispatcher.serve(Request::new(Method::Get, "/ping")).body_text(), "\"one\"");
}

#[test]
fn test_unversioned_routes_stay_reachable_without_default() {
    let mut api = Api::new();
    api.versioning(Versioning::new(Strategy::Header).with_vendor("acme"));
    api.get("/health", |_| Ok(json!("ok")));
    api.version("v1", |api| {
        api.get("/users", |_| Ok(json!([])));
    });
    let dispatcher = api.build().unwrap();

    let health = dispatcher
        .serve(Request::new(Method::Get, "/health").with_header("Accept", "application/json"));
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body_text(), "\"ok\"");

    let users = dispatcher
        .serve(Request::new(Method::Get, "/users").with_header("Accept", "application/vnd.acme-v1"));
    assert_eq!(users.status, StatusCode::OK);
    assert_eq!(users.body_text(), "[]");
}

#[test]
fn test_after_filter_runs_on_unacceptable_response() {
    let hits = Arc::new(Mutex::new(0));
    let mut api = Api::new();
    let counter = hits.clone();
    api.after(move |ep| {
        *counter.lock().unwrap() += 1;
        Err(ep.halt(StatusCode::NOT_ACCEPTABLE, json!({"seen": true})))
    });
    api.get("/report", |_| panic!("handler must not run"));
    let dispatcher = api.build().unwrap();

    let response = dispatcher
        .serve(Request::new(Method::Get, "/report").with_header("Accept", "application/xml"));
    assert_eq!(response.status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(body_json(&response), json!({"seen": true}));
    assert_eq!(*hits.lock().unwrap(), 1);
}

#[test]
fn test_mounted_api_keeps_own_formats() {
    let mut reports = Api::new();
    reports.respond_to(&["json", "csv"]);
    reports.get("/daily", |_| Ok(json!("daily")));

    let mut api = Api::new();
    api.version("v1", |api| {
        api.mount("/reports", reports);
    });
    let dispatcher = api.build().unwrap();

    let response = dispatcher.serve(Request::new(Method::Get, "/v1/reports/daily.json"));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body_text(), "\"daily\"");
    let missing = dispatcher.serve(Request::new(Method::Get, "/reports/daily"));
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}
