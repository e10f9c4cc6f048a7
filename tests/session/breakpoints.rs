use crate::common::{fixture_path, greeter_engine, MockEngine, MockValue, TestSession, FIXTURE};
use bugstalker_dap::breakpoint::{Comparator, HitCondition, Location};
use bugstalker_dap::engine::{Engine, MethodLocations, StopReason};
use serde_json::{json, Value};

fn set_lines(s: &TestSession, lines: &[u32]) -> Value {
    let breakpoints = lines.iter().map(|l| json!({ "line": l })).collect::<Vec<_>>();
    s.request_ok(
        "setBreakpoints",
        json!({ "source": { "path": FIXTURE }, "breakpoints": breakpoints }),
    )
}

fn ids(body: &Value) -> Vec<u64> {
    body["breakpoints"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|bp| bp["id"].as_u64())
        .collect()
}

#[test]
fn test_set_breakpoints_keeps_unchanged_ids() {
    let engine = MockEngine::new();
    let s = TestSession::new(engine.clone());

    let body = set_lines(&s, &[3, 5]);
    assert_eq!(ids(&body), vec![1, 2]);
    assert_eq!(body["breakpoints"][0]["verified"], true);
    assert_eq!(body["breakpoints"][0]["line"], 3);
    assert_eq!(
        body["breakpoints"][0]["source"]["path"],
        fixture_path().display().to_string()
    );

    let body = set_lines(&s, &[5, 7]);
    assert_eq!(ids(&body), vec![2, 3]);
    assert_eq!(engine.breakpoint_ids(), vec![2, 3]);

    let body = set_lines(&s, &[]);
    assert_eq!(body["breakpoints"], json!([]));
    assert!(engine.breakpoint_ids().is_empty());
}

#[test]
fn test_set_breakpoints_legacy_lines() {
    let engine = MockEngine::new();
    let s = TestSession::new(engine.clone());

    let body = s.request_ok(
        "setBreakpoints",
        json!({ "source": { "path": FIXTURE }, "lines": [2, 11] }),
    );
    assert_eq!(ids(&body), vec![1, 2]);
    assert_eq!(engine.breakpoint_ids(), vec![1, 2]);
}

#[test]
fn test_set_breakpoints_invalid_line() {
    let engine = MockEngine::new();
    let s = TestSession::new(engine.clone());

    let body = set_lines(&s, &[3, 4]);
    let breakpoints = body["breakpoints"].as_array().unwrap();
    assert_eq!(breakpoints.len(), 2);
    assert_eq!(breakpoints[0]["verified"], true);
    assert_eq!(breakpoints[1]["verified"], false);
    assert_eq!(breakpoints[1]["message"], "Line 4 is not a valid breakpoint location");
    assert_eq!(engine.breakpoint_ids(), vec![1]);
}

#[test]
fn test_set_breakpoints_conditions() {
    let engine = MockEngine::new();
    let s = TestSession::new(engine.clone());

    s.request_ok(
        "setBreakpoints",
        json!({
            "source": { "path": FIXTURE },
            "breakpoints": [
                { "line": 3, "condition": "count > 1", "hitCondition": "% 2" },
                { "line": 6, "hitCondition": ">= 5" },
                { "line": 7, "condition": "  " },
            ],
        }),
    );

    let bp = engine.breakpoint(1).unwrap();
    assert_eq!(bp.condition.as_deref(), Some("count > 1"));
    assert_eq!(bp.hit_condition, HitCondition::new(Comparator::Mod, 2));
    let bp = engine.breakpoint(2).unwrap();
    assert_eq!(bp.condition, None);
    assert_eq!(bp.hit_condition, HitCondition::new(Comparator::Ge, 5));
    let bp = engine.breakpoint(3).unwrap();
    assert_eq!(bp.condition, None);
    assert_eq!(bp.hit_condition, HitCondition::ALWAYS);
}

#[test]
fn test_set_breakpoints_bad_hit_condition() {
    let engine = MockEngine::new();
    let s = TestSession::new(engine.clone());
    set_lines(&s, &[3]);

    let message = s.request_err(
        "setBreakpoints",
        json!({
            "source": { "path": FIXTURE },
            "breakpoints": [{ "line": 6, "hitCondition": "often" }],
        }),
    );
    assert_eq!(message, "'often' is not a valid hit condition");
    // a rejected request leaves breakpoints untouched
    assert_eq!(engine.breakpoint_ids(), vec![1]);
}

#[test]
fn test_set_breakpoints_missing_source() {
    let s = TestSession::new(MockEngine::new());
    assert_eq!(
        s.request_err(
            "setBreakpoints",
            json!({ "source": { "path": "./tests/fixtures/none.rb" }, "lines": [1] })
        ),
        "No source file available for './tests/fixtures/none.rb'"
    );
    assert_eq!(
        s.request_err("setBreakpoints", json!({ "source": {} })),
        "Argument is unspecified: source path"
    );
}

#[test]
fn test_breakpoint_locations() {
    let s = TestSession::new(MockEngine::new());
    let body = s.request_ok(
        "breakpointLocations",
        json!({ "source": { "path": FIXTURE }, "line": 3, "endLine": 7 }),
    );
    assert_eq!(
        body["breakpoints"],
        json!([{ "line": 3 }, { "line": 5 }, { "line": 6 }, { "line": 7 }])
    );

    let body = s.request_ok(
        "breakpointLocations",
        json!({ "source": { "path": FIXTURE }, "line": 4 }),
    );
    assert_eq!(body["breakpoints"], json!([]));
}

#[test]
fn test_function_breakpoints() {
    let engine = MockEngine::new();
    engine.add_method(
        "Greeter",
        "greet",
        MethodLocations {
            class_method: None,
            instance_method: Some((fixture_path(), 6)),
        },
    );
    let s = TestSession::new(engine.clone());

    let body = s.request_ok(
        "setFunctionBreakpoints",
        json!({ "breakpoints": [{ "name": "Greeter#greet" }, { "name": "not a method" }] }),
    );
    let breakpoints = body["breakpoints"].as_array().unwrap();
    assert_eq!(breakpoints.len(), 2);
    assert_eq!(breakpoints[0]["id"], 1);
    assert_eq!(breakpoints[0]["verified"], true);
    assert_eq!(breakpoints[0]["line"], 6);
    assert_eq!(breakpoints[1]["verified"], false);

    let bp = engine.breakpoint(1).unwrap();
    assert_eq!(
        bp.location,
        Location::Method {
            class: "Greeter".to_string(),
            method: "greet".to_string()
        }
    );

    // line breakpoints are not affected by function breakpoints
    set_lines(&s, &[3]);
    let body = s.request_ok(
        "setFunctionBreakpoints",
        json!({ "breakpoints": [{ "name": "Greeter#greet" }, { "name": "Greeter.new" }] }),
    );
    assert_eq!(ids(&body), vec![1, 3]);

    s.request_ok("setFunctionBreakpoints", json!({ "breakpoints": [] }));
    assert_eq!(engine.breakpoint_ids(), vec![2]);
}

#[test]
fn test_exception_breakpoints() {
    let engine = MockEngine::new();
    let s = TestSession::new(engine.clone());

    s.request_ok("setExceptionBreakpoints", json!({ "filters": ["all"] }));
    assert_eq!(engine.catchpoints(), vec!["Exception".to_string()]);

    s.request_ok("setExceptionBreakpoints", json!({ "filters": [] }));
    assert!(engine.catchpoints().is_empty());
}

#[test]
fn test_log_point() {
    let engine = greeter_engine();
    let s = TestSession::launched(engine.clone());
    s.request_ok(
        "setBreakpoints",
        json!({
            "source": { "path": FIXTURE },
            "breakpoints": [{ "line": 7, "logMessage": "count is {count}" }],
        }),
    );

    // a log point never stops the thread
    s.stop_thread(1, StopReason::Breakpoint, Some(1), None)
        .join()
        .unwrap();

    let output = s.wait_events("output", 1);
    assert_eq!(output[0]["body"]["category"], "console");
    assert_eq!(output[0]["body"]["output"], "count is 42\n");
    assert_eq!(output[0]["body"]["line"], 7);
    assert!(s.events("stopped").is_empty());

    // a broken expression silences the log point
    s.request_ok(
        "setBreakpoints",
        json!({
            "source": { "path": FIXTURE },
            "breakpoints": [{ "line": 7, "logMessage": "value is {raise}" }],
        }),
    );
    s.stop_thread(1, StopReason::Breakpoint, Some(1), None)
        .join()
        .unwrap();
    assert_eq!(s.events("output").len(), 1);
    assert!(s.events("stopped").is_empty());
}

#[test]
fn test_breakpoint_hit() {
    let engine = greeter_engine();
    let s = TestSession::launched(engine.clone());
    set_lines(&s, &[7]);

    let handle = s.stop_thread(1, StopReason::Breakpoint, Some(1), None);
    s.wait_stopped(1);

    let stopped = s.wait_events("stopped", 1);
    let body = &stopped[0]["body"];
    assert_eq!(body["reason"], "breakpoint");
    assert_eq!(body["threadId"], 1);
    assert_eq!(body["hitBreakpointIds"], json!([1]));
    assert_eq!(body["description"], "Hit breakpoint");

    s.resume(1, handle);
}

#[test]
fn test_exception_stop() {
    let engine = greeter_engine();
    let s = TestSession::launched(engine.clone());

    let cause = MockValue::exception("IOError", "closed stream", None);
    let ex = MockValue::exception("Greeter::Error", "greeting failed", Some(cause));
    let handle = s.stop_thread(1, StopReason::Catchpoint, None, Some(ex));
    s.wait_stopped(1);

    let stopped = s.wait_events("stopped", 1);
    assert_eq!(stopped[0]["body"]["reason"], "exception");

    let body = s.request_ok("exceptionInfo", json!({ "threadId": 1 }));
    assert_eq!(body["exceptionId"], "Greeter::Error");
    assert_eq!(body["description"], "greeting failed (Greeter::Error)");
    assert_eq!(body["breakMode"], "always");
    assert_eq!(body["details"]["typeName"], "Error");
    assert_eq!(body["details"]["evaluateName"], "$!");
    assert_eq!(body["details"]["innerException"][0]["message"], "closed stream");
    assert_eq!(body["details"]["innerException"][0]["evaluateName"], "$!.cause");

    s.resume(1, handle);
    assert_eq!(
        s.request_err("exceptionInfo", json!({ "threadId": 1 })),
        "Not in a catchpoint context"
    );
}
