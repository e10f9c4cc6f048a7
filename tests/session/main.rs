
mod breakpoints;
mod server;
mod variables;

use crate::common::{greeter_engine, MockEngine, TestSession};
use bugstalker_dap::command::{Ctx, Handler, Registry};
use bugstalker_dap::engine::Engine;
use bugstalker_dap::error::Error;
use bugstalker_dap::session::SessionState;
use serde_json::{json, Value};

#[test]
fn test_initialize() {
    let s = TestSession::new(MockEngine::new());
    let body = s.request_ok("initialize", json!({ "adapterID": "test" }));
    assert_eq!(body["supportsConfigurationDoneRequest"], true);
    assert_eq!(body["supportsLogPoints"], true);
    assert_eq!(body["exceptionBreakpointFilters"][0]["filter"], "all");

    let initialized = s.events("initialized");
    assert_eq!(initialized.len(), 1);
    assert_eq!(s.session.state(), SessionState::Initializing);
}

#[test]
fn test_unknown_command() {
    let s = TestSession::new(MockEngine::new());
    assert_eq!(s.request_err("restartFrame", Value::Null), "Invalid command");
}

fn explode(_: &Ctx) -> Result<(), Error> {
    panic!("handler exploded")
}

#[test]
fn test_panicking_handler() {
    let mut registry = Registry::standard();
    registry.register("explode", Handler::Direct(explode));
    let s = TestSession::with_registry(MockEngine::new(), registry);

    assert_eq!(
        s.request_err("explode", Value::Null),
        "An internal error occurred"
    );
    // only the failed request is affected
    s.request_ok("initialize", Value::Null);
    assert!(!s.session.is_closed());
}

#[test]
fn test_commands_require_started_debugger() {
    let s = TestSession::new(greeter_engine());
    assert_eq!(
        s.request_err("threads", Value::Null),
        "Cannot threads - debugger is not running"
    );
    assert_eq!(
        s.request_err("continue", json!({ "threadId": 1 })),
        "Cannot continue - debugger is not running"
    );
}

#[test]
fn test_launch_twice() {
    let s = TestSession::launched(greeter_engine());
    assert_eq!(s.session.state(), SessionState::Running);
    assert_eq!(
        s.request_err("launch", Value::Null),
        "Cannot launch - debugger is already running"
    );
    assert_eq!(
        s.request_err("attach", Value::Null),
        "Cannot attach - debugger is already running"
    );
}

#[test]
fn test_launch_without_debug() {
    let engine = greeter_engine();
    let s = TestSession::new(engine.clone());
    s.request_ok("initialize", Value::Null);
    s.request_ok("launch", json!({ "noDebug": true }));
    assert_eq!(
        s.request_err("threads", Value::Null),
        "Cannot threads - debugger is not running"
    );
}

#[test]
fn test_threads() {
    let s = TestSession::launched(greeter_engine());
    let body = s.request_ok("threads", Value::Null);
    assert_eq!(body["threads"], json!([{ "id": 1, "name": "main" }]));

    assert_eq!(
        s.request_err("stackTrace", Value::Null),
        "Argument is unspecified: thread ID"
    );
    assert_eq!(
        s.request_err("stackTrace", json!({ "threadId": 9 })),
        "Cannot locate thread #9"
    );
}

#[test]
fn test_malformed_arguments() {
    let s = TestSession::launched(greeter_engine());
    let message = s.request_err("stackTrace", json!({ "threadId": "one" }));
    assert!(message.starts_with("Invalid arguments"), "{message}");
}

#[test]
fn test_disconnect_launched() {
    let engine = greeter_engine();
    let s = TestSession::launched(engine.clone());
    s.request_ok("disconnect", Value::Null);

    assert!(s.session.is_closed());
    assert_eq!(s.session.state(), SessionState::Closed);
    assert!(!engine.is_started());
    assert!(!engine.has_hook());
    assert!(engine.is_exited());

    // teardown is idempotent
    s.session.stop();
    assert_eq!(s.session.state(), SessionState::Closed);
}

#[test]
fn test_disconnect_attached() {
    let engine = greeter_engine();
    let s = TestSession::new(engine.clone());
    s.request_ok("initialize", Value::Null);
    s.request_ok("attach", Value::Null);
    s.request_ok("disconnect", Value::Null);

    assert!(s.session.is_closed());
    assert!(!engine.is_exited());
}

#[test]
fn test_source() {
    let s = TestSession::new(MockEngine::new());
    let body = s.request_ok(
        "source",
        json!({ "source": { "path": common::FIXTURE }, "sourceReference": 0 }),
    );
    assert!(body["content"].as_str().unwrap().contains("class Greeter"));

    assert_eq!(
        s.request_err("source", json!({ "source": { "path": "./tests/fixtures/none.rb" } })),
        "No source file available for './tests/fixtures/none.rb'"
    );
    assert_eq!(
        s.request_err("source", json!({ "source": {} })),
        "Argument is unspecified: source path"
    );
}
