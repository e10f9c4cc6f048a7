use crate::common::{greeter_engine, MockScope, MockValue, TestSession};
use bugstalker_dap::engine::StopReason;
use serde_json::{json, Value};
use serial_test::serial;
use std::time::{Duration, Instant};

fn frame_ids(s: &TestSession, thread: i64) -> Vec<i64> {
    let body = s.request_ok("stackTrace", json!({ "threadId": thread }));
    body["stackFrames"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_i64().unwrap())
        .collect()
}

fn scope_reference(s: &TestSession, frame: i64, name: &str) -> i64 {
    let body = s.request_ok("scopes", json!({ "frameId": frame }));
    body["scopes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|scope| scope["name"] == name)
        .and_then(|scope| scope["variablesReference"].as_i64())
        .unwrap_or_else(|| panic!("no {name} scope in {body}"))
}

fn variables(s: &TestSession, reference: i64) -> Vec<Value> {
    let body = s.request_ok("variables", json!({ "variablesReference": reference }));
    body["variables"].as_array().unwrap().clone()
}

fn find<'a>(vars: &'a [Value], name: &str) -> &'a Value {
    vars.iter()
        .find(|v| v["name"] == name)
        .unwrap_or_else(|| panic!("no variable {name}"))
}

#[test]
fn test_stack_trace() {
    let s = TestSession::launched(greeter_engine());
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);

    let body = s.request_ok("stackTrace", json!({ "threadId": 1 }));
    assert_eq!(body["totalFrames"], 2);
    assert_eq!(body["stackFrames"][0]["name"], "Greeter#greet");
    assert_eq!(body["stackFrames"][0]["line"], 7);
    assert_eq!(body["stackFrames"][1]["name"], "<main>");

    let body = s.request_ok(
        "stackTrace",
        json!({ "threadId": 1, "startFrame": 1, "levels": 5 }),
    );
    assert_eq!(body["stackFrames"].as_array().unwrap().len(), 1);
    assert_eq!(body["stackFrames"][0]["line"], 11);

    s.resume(1, handle);
}

#[test]
fn test_scopes() {
    let s = TestSession::launched(greeter_engine());
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);

    let frames = frame_ids(&s, 1);
    let body = s.request_ok("scopes", json!({ "frameId": frames[0] }));
    let scopes = body["scopes"].as_array().unwrap();
    let names: Vec<_> = scopes.iter().map(|s| s["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Arguments", "Locals", "Globals"]);
    assert_eq!(scopes[0]["namedVariables"], 1);
    // count, list, broken and self
    assert_eq!(scopes[1]["namedVariables"], 4);
    assert_eq!(scopes[1]["presentationHint"], "locals");
    assert_eq!(scopes[2]["expensive"], true);

    // top level frame: no arguments and no self
    let body = s.request_ok("scopes", json!({ "frameId": frames[1] }));
    let names: Vec<_> = body["scopes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Locals", "Globals"]);

    assert_eq!(
        s.request_err("scopes", json!({ "frameId": 1000 })),
        "Cannot locate frame ID #1000"
    );
    assert_eq!(
        s.request_err("scopes", json!({})),
        "Argument is unspecified: frame ID"
    );

    s.resume(1, handle);
}

#[test]
fn test_variables() {
    let s = TestSession::launched(greeter_engine());
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);

    let frames = frame_ids(&s, 1);
    let locals = variables(&s, scope_reference(&s, frames[0], "Locals"));
    let names: Vec<_> = locals.iter().map(|v| v["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["broken", "count", "list", "self"]);

    let count = find(&locals, "count");
    assert_eq!(count["value"], "42");
    assert_eq!(count["type"], "Integer");
    assert_eq!(count["variablesReference"], 0);

    let list = find(&locals, "list");
    assert_eq!(list["value"], "[1, 2]");
    assert_eq!(list["indexedVariables"], 2);
    let items = variables(&s, list["variablesReference"].as_i64().unwrap());
    assert_eq!(items[0]["name"], "0");
    assert_eq!(items[1]["value"], "2");

    let receiver = find(&locals, "self");
    assert_eq!(receiver["value"], "#<Greeter>");
    assert_eq!(receiver["namedVariables"], 1);
    let ivars = variables(&s, receiver["variablesReference"].as_i64().unwrap());
    assert_eq!(ivars[0]["name"], "@name");
    assert_eq!(ivars[0]["value"], "\"world\"");

    let arguments = variables(&s, scope_reference(&s, frames[0], "Arguments"));
    assert_eq!(find(&arguments, "punctuation")["value"], "\"!\"");

    let globals = variables(&s, scope_reference(&s, frames[0], "Globals"));
    assert_eq!(find(&globals, "$stdout")["type"], "String");

    s.resume(1, handle);
}

#[test]
fn test_variables_paging_and_filter() {
    let s = TestSession::launched(greeter_engine());
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);

    let frames = frame_ids(&s, 1);
    let locals = scope_reference(&s, frames[0], "Locals");
    let body = s.request_ok(
        "variables",
        json!({ "variablesReference": locals, "start": 1, "count": 2 }),
    );
    let names: Vec<_> = body["variables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["count", "list"]);

    let body = s.request_ok(
        "variables",
        json!({ "variablesReference": locals, "filter": "indexed" }),
    );
    assert_eq!(body["variables"], json!([]));

    s.resume(1, handle);
}

#[test]
fn test_inspect_failure() {
    let s = TestSession::launched(greeter_engine());
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);

    let frames = frame_ids(&s, 1);
    let locals = variables(&s, scope_reference(&s, frames[0], "Locals"));
    let broken = find(&locals, "broken");
    assert_eq!(broken["value"], "*Error in evaluation*");
    assert_eq!(broken["type"], "Broken");

    s.resume(1, handle);
}

#[test]
fn test_inspect_failure_with_working_to_s() {
    let engine = greeter_engine();
    engine.add_global("$opaque", MockValue::opaque("opaque"));
    let s = TestSession::launched(engine);
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);

    let body = s.request_ok("evaluate", json!({ "expression": "$opaque" }));
    assert_eq!(body["result"], "*Error in evaluation*");
    assert_eq!(body["type"], "Opaque");

    let frames = frame_ids(&s, 1);
    let globals = variables(&s, scope_reference(&s, frames[0], "Globals"));
    assert_eq!(find(&globals, "$opaque")["value"], "*Error in evaluation*");

    s.resume(1, handle);
}

#[test]
fn test_paging_with_huge_bounds() {
    let s = TestSession::launched(greeter_engine());
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);

    let body = s.request_ok(
        "stackTrace",
        json!({ "threadId": 1, "startFrame": 1, "levels": u64::MAX }),
    );
    assert_eq!(body["stackFrames"].as_array().unwrap().len(), 1);
    assert_eq!(body["totalFrames"], 2);

    let frames = frame_ids(&s, 1);
    let locals = scope_reference(&s, frames[0], "Locals");
    let body = s.request_ok(
        "variables",
        json!({ "variablesReference": locals, "start": 1, "count": u64::MAX }),
    );
    assert_eq!(body["variables"].as_array().unwrap().len(), 3);

    // the session still serves requests
    s.request_ok("threads", json!({}));
    s.resume(1, handle);
}

#[test]
fn test_handles_expire_on_resume() {
    let s = TestSession::launched(greeter_engine());
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);

    let frames = frame_ids(&s, 1);
    let locals = scope_reference(&s, frames[0], "Locals");
    variables(&s, locals);
    s.resume(1, handle);

    assert_eq!(
        s.request_err("variables", json!({ "variablesReference": locals })),
        format!("Cannot locate variables reference #{locals}")
    );
    assert_eq!(
        s.request_err("scopes", json!({ "frameId": frames[0] })),
        format!("Cannot locate frame ID #{}", frames[0])
    );

    // new handles never collide with expired ones
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);
    let new_frames = frame_ids(&s, 1);
    assert!(new_frames[0] > *frames.last().unwrap());
    s.resume(1, handle);
}

#[test]
fn test_evaluate() {
    let s = TestSession::launched(greeter_engine());
    let handle = s.stop_thread(1, StopReason::Step, None, None);
    s.wait_stopped(1);
    let frames = frame_ids(&s, 1);

    let body = s.request_ok(
        "evaluate",
        json!({ "expression": "count", "frameId": frames[0] }),
    );
    assert_eq!(body["result"], "42");
    assert_eq!(body["type"], "Integer");

    let body = s.request_ok(
        "evaluate",
        json!({ "expression": "list", "frameId": frames[0] }),
    );
    assert!(body["variablesReference"].as_i64().unwrap() > 0);

    // debuggee errors are results, not failures
    let body = s.request_ok(
        "evaluate",
        json!({ "expression": "missing", "frameId": frames[0] }),
    );
    assert_eq!(body["result"], "undefined local variable missing (NameError)");

    let body = s.request_ok(
        "evaluate",
        json!({ "expression": "raise", "frameId": frames[0] }),
    );
    assert_eq!(body["result"], "evaluation crashed (panic)");

    // without a frame the expression is evaluated globally
    let body = s.request_ok("evaluate", json!({ "expression": "$stdout" }));
    assert_eq!(body["result"], "\"#<IO:<STDOUT>>\"");

    s.resume(1, handle);
}

#[test]
#[serial]
fn test_unresponsive_thread() {
    let engine = greeter_engine();
    engine.add_thread(
        2,
        Some("worker"),
        vec![(
            "Worker#run",
            3,
            MockScope::new().with_local("job", MockValue::int(1)),
        )],
    );
    let s = TestSession::launched(engine);

    // thread #2 is never stopped, nobody serves its evaluations
    let frames = frame_ids(&s, 2);
    let locals = scope_reference(&s, frames[0], "Locals");

    let start = Instant::now();
    let vars = variables(&s, locals);
    let elapsed = start.elapsed();

    assert_eq!(find(&vars, "job")["value"], "*Thread #2 (worker) unresponsive*");
    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert!(!s.session.processor(2).is_pending());
}
