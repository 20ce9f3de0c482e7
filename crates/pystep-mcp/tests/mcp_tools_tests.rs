use std::sync::Arc;

use pretty_assertions::assert_eq;
use pystep::debugger::{DebugLimits, SessionRegistry};
use pystep_mcp::handler::{McpHandler, ToolError};
use serde_json::{Value, json};

fn handler() -> McpHandler {
    McpHandler::new(Arc::new(SessionRegistry::new(DebugLimits::new())))
}

fn create(handler: &McpHandler, code: &str) -> String {
    let state = handler.call_tool("create_session", json!({ "code": code })).unwrap();
    state["id"].as_str().unwrap().to_owned()
}

// =============================================================================
// Tool listing & dispatch
// =============================================================================

#[test]
fn tools_list_covers_every_registry_operation() {
    let tools = handler().list_tools();
    let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "create_session",
            "get_session",
            "delete_session",
            "reset_session",
            "start_execution",
            "step_forward",
            "run_to_completion",
            "continue_execution",
            "toggle_breakpoint",
            "get_breakpoints",
            "get_variables",
            "get_latest_variables",
            "get_execution_state",
            "list_sessions",
        ]
    );
}

#[test]
fn unknown_tool() {
    let err = handler().call_tool("evaluate", json!({})).unwrap_err();
    assert_eq!(err, ToolError::UnknownTool("evaluate".to_owned()));
    assert_eq!(err.code(), -32000);
}

#[test]
fn malformed_arguments() {
    let handler = handler();
    let err = handler.call_tool("create_session", json!({ "source": "x = 1" })).unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(_)));
    assert_eq!(err.code(), -32602);

    let id = create(&handler, "x = 1");
    let err = handler
        .call_tool("toggle_breakpoint", json!({ "session_id": id, "line": "two" }))
        .unwrap_err();
    assert_eq!(err.code(), -32602);
}

#[test]
fn unknown_session() {
    let err = handler()
        .call_tool("step_forward", json!({ "session_id": "nope" }))
        .unwrap_err();
    assert_eq!(err, ToolError::NotFound("nope".to_owned()));
    assert_eq!(err.code(), -32004);
    assert_eq!(err.to_string(), "session not found: nope");
}

// =============================================================================
// Session workflow
// =============================================================================

#[test]
fn create_and_run_to_completion() {
    let handler = handler();
    let state = handler
        .call_tool("create_session", json!({ "code": "a = 1\nb = 2\nc = a + b\nprint(f\"Result: {c}\")\n" }))
        .unwrap();
    assert_eq!(state["currentLine"], -1);
    assert_eq!(state["hasStarted"], false);

    let id = state["id"].as_str().unwrap();
    let state = handler.call_tool("run_to_completion", json!({ "session_id": id })).unwrap();
    assert_eq!(state["isFinished"], true);
    assert_eq!(state["error"], Value::Null);
    assert_eq!(state["output"], json!(["Result: 3"]));
}

#[test]
fn stepping_and_breakpoints() {
    let handler = handler();
    let id = create(&handler, "a = 1\nb = 2\nc = a + b\n");
    let args = json!({ "session_id": id });

    let breakpoints = handler
        .call_tool("toggle_breakpoint", json!({ "session_id": id, "line": 3 }))
        .unwrap();
    assert_eq!(breakpoints, json!({ "breakpoints": [3] }));
    assert_eq!(handler.call_tool("get_breakpoints", args.clone()).unwrap(), breakpoints);

    let state = handler.call_tool("start_execution", args.clone()).unwrap();
    assert_eq!(state["currentLine"], 1);
    assert_eq!(state["status"], "paused");

    let state = handler.call_tool("continue_execution", args.clone()).unwrap();
    assert_eq!(state["currentLine"], 3);
    assert_eq!(state["breakpointHit"], true);

    let latest = handler.call_tool("get_latest_variables", args.clone()).unwrap();
    let names: Vec<&str> = latest["variables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(latest["variables"][0]["type"], "int");

    let state = handler.call_tool("step_forward", args.clone()).unwrap();
    assert_eq!(state["status"], "finishedOk");
    let log = handler.call_tool("get_variables", args).unwrap();
    assert!(log["variables"].as_array().unwrap().len() >= 3);
}

#[test]
fn errors_are_reported_in_the_state() {
    let handler = handler();
    let id = create(&handler, "x = 10\ny = 0\nz = x / y\n");
    let state = handler.call_tool("run_to_completion", json!({ "session_id": id })).unwrap();
    assert_eq!(state["isFinished"], true);
    assert_eq!(state["error"]["kind"], "runtime");
    assert_eq!(state["error"]["excType"], "ZeroDivisionError");

    let id = create(&handler, "print('oops)\n");
    let state = handler.call_tool("start_execution", json!({ "session_id": id })).unwrap();
    assert_eq!(state["error"]["kind"], "syntax");
    assert_eq!(state["error"]["line"], 1);
}

#[test]
fn reset_delete_and_list() {
    let handler = handler();
    let id = create(&handler, "x = 1\n");
    let args = json!({ "session_id": id });
    handler.call_tool("run_to_completion", args.clone()).unwrap();

    let state = handler.call_tool("reset_session", args.clone()).unwrap();
    assert_eq!(state["id"], id.as_str());
    assert_eq!(state["hasStarted"], false);

    let listed = handler.call_tool("list_sessions", json!({})).unwrap();
    assert_eq!(listed["sessions"][0]["id"], id.as_str());
    assert_eq!(listed["sessions"][0]["status"], "notStarted");

    assert_eq!(handler.call_tool("delete_session", args.clone()).unwrap(), json!({ "deleted": true }));
    assert_eq!(handler.call_tool("delete_session", args.clone()).unwrap(), json!({ "deleted": false }));
    assert_eq!(handler.call_tool("get_session", args).unwrap_err().code(), -32004);
    assert!(handler.registry().is_empty());
}

#[test]
fn test_case_is_passed_as_input() {
    let handler = handler();
    let state = handler
        .call_tool(
            "create_session",
            json!({ "code": "a = input()\nb = input()\nprint(b + a)\n", "test_case": "x\ny\n" }),
        )
        .unwrap();
    let id = state["id"].as_str().unwrap();
    let state = handler.call_tool("run_to_completion", json!({ "session_id": id })).unwrap();
    assert_eq!(state["output"], json!(["yx"]));
}
