//! Integration tests for `SessionRegistry`: lifecycle, lookups and expiry.

use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use pretty_assertions::assert_eq;
use pystep::debugger::{DebugError, DebugLimits, SessionRegistry, SessionStatus};

const PROGRAM: &str = "a = 1\nb = 2\nc = a + b\nprint(f\"Result: {c}\")\n";

fn registry() -> SessionRegistry {
    SessionRegistry::new(DebugLimits::new())
}

// ============================================================================
// Creation & lookup
// ============================================================================

#[test]
fn created_session_is_fresh() {
    let registry = registry();
    let state = registry.create_session(PROGRAM, None);
    assert_eq!(state.current_line, -1);
    assert!(!state.has_started);
    assert_eq!(state.status, SessionStatus::NotStarted);
    assert_eq!(registry.get_session(&state.id).unwrap(), state);
    assert_eq!(registry.get_execution_state(&state.id).unwrap(), state);
}

#[test]
fn session_ids_are_unique_uuids() {
    let registry = registry();
    let a = registry.create_session(PROGRAM, None).id;
    let b = registry.create_session(PROGRAM, None).id;
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
    assert_eq!(registry.len(), 2);
}

#[test]
fn unknown_ids_are_not_found() {
    let registry = registry();
    let missing = "missing".to_owned();
    let not_found = Err(DebugError::NotFound(missing.clone()));
    assert_eq!(registry.get_session(&missing), not_found);
    assert_eq!(registry.reset_session(&missing), not_found);
    assert_eq!(registry.start_execution(&missing), not_found);
    assert_eq!(registry.step_forward(&missing), not_found);
    assert_eq!(registry.run_to_completion(&missing), not_found);
    assert_eq!(registry.continue_execution(&missing), not_found);
    assert_eq!(registry.get_execution_state(&missing), not_found);
    assert!(registry.toggle_breakpoint(&missing, 1).is_err());
    assert!(registry.get_breakpoints(&missing).is_err());
    assert!(registry.get_variables(&missing).is_err());
    assert!(registry.get_latest_variables(&missing).is_err());
    assert!(!registry.delete_session(&missing));
    assert_eq!(DebugError::NotFound(missing).to_string(), "session not found: missing");
}

// ============================================================================
// Delete & reset
// ============================================================================

#[test]
fn delete_removes_the_session_and_its_artifact() {
    let registry = registry();
    let id = registry.create_session(PROGRAM, None).id;
    let state = registry.start_execution(&id).unwrap();
    let artifact = state.call_stack[0].file.clone();
    assert!(Path::new(&artifact).exists());

    assert!(registry.delete_session(&id));
    assert!(!Path::new(&artifact).exists());
    assert_eq!(registry.get_session(&id), Err(DebugError::NotFound(id.clone())));
    assert!(!registry.delete_session(&id));
    assert!(registry.is_empty());
}

#[test]
fn reset_keeps_id_and_breakpoints() {
    let registry = registry();
    let id = registry.create_session(PROGRAM, None).id;
    registry.toggle_breakpoint(&id, 3).unwrap();
    registry.start_execution(&id).unwrap();
    registry.step_forward(&id).unwrap();

    let state = registry.reset_session(&id).unwrap();
    assert_eq!(state.id, id);
    assert_eq!(state.breakpoints, vec![3]);
    assert_eq!(state.current_line, -1);
    assert!(state.variables.is_empty());
    assert!(!state.has_started);
    assert_eq!(registry.len(), 1);

    let state = registry.run_to_completion(&id).unwrap();
    assert_eq!(state.current_line, 3);
    assert!(!state.is_finished);
}

#[test]
fn delete_releases_a_caller_waiting_on_the_worker() {
    let registry = SessionRegistry::new(DebugLimits::new().step_timeout(Duration::from_secs(30)));
    let id = registry.create_session("while True:\n    pass\n", None).id;
    registry.start_execution(&id).unwrap();

    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            let started = Instant::now();
            let result = registry.continue_execution(&id);
            (started.elapsed(), result)
        });
        thread::sleep(Duration::from_millis(200));
        assert!(registry.delete_session(&id));

        let (elapsed, result) = waiter.join().unwrap();
        assert!(elapsed < Duration::from_secs(10), "caller waited {elapsed:?}");
        if let Ok(state) = result {
            assert_eq!(state.error, None);
        }
    });
}

#[test]
fn reset_keeps_the_test_case() {
    let registry = registry();
    let id = registry.create_session("print(input())\n", Some("hello")).id;
    assert_eq!(registry.run_to_completion(&id).unwrap().output, vec!["hello".to_owned()]);
    registry.reset_session(&id).unwrap();
    assert_eq!(registry.run_to_completion(&id).unwrap().output, vec!["hello".to_owned()]);
}

// ============================================================================
// Execution through the registry
// ============================================================================

#[test]
fn sum_program_runs_to_completion() {
    let registry = registry();
    let id = registry.create_session(PROGRAM, None).id;
    let state = registry.run_to_completion(&id).unwrap();
    assert!(state.is_finished);
    assert_eq!(state.error, None);
    assert!(state.output.iter().any(|line| line.contains("Result: 3")));
}

#[test]
fn breakpoints_round_trip() {
    let registry = registry();
    let id = registry.create_session(PROGRAM, None).id;
    let original = registry.get_breakpoints(&id).unwrap();
    assert!(original.breakpoints.is_empty());
    assert_eq!(registry.toggle_breakpoint(&id, 2).unwrap().breakpoints, vec![2]);
    assert_eq!(registry.toggle_breakpoint(&id, 2).unwrap(), original);
}

#[test]
fn variable_views() {
    let registry = registry();
    let id = registry.create_session("x = 1\nx = 2\ny = x\n", None).id;
    registry.run_to_completion(&id).unwrap();

    let log = registry.get_variables(&id).unwrap();
    let xs: Vec<&str> = log
        .iter()
        .filter(|entry| entry.name == "x")
        .map(|entry| entry.value.as_str())
        .collect();
    assert_eq!(xs.first(), Some(&"1"));
    assert_eq!(xs.last(), Some(&"2"));

    let latest = registry.get_latest_variables(&id).unwrap();
    let pairs: Vec<(&str, &str)> = latest
        .iter()
        .map(|entry| (entry.name.as_str(), entry.value.as_str()))
        .collect();
    assert_eq!(pairs, vec![("x", "2"), ("y", "2")]);
}

#[test]
fn state_serializes_with_camel_case_fields() {
    let registry = registry();
    let id = registry.create_session(PROGRAM, None).id;
    let state = registry.start_execution(&id).unwrap();
    let json = serde_json::to_value(&state).unwrap();
    for field in [
        "id",
        "currentLine",
        "variables",
        "hasStarted",
        "isFinished",
        "output",
        "error",
        "breakpoints",
        "callStack",
        "recursiveFunctions",
        "status",
        "breakpointHit",
    ] {
        assert!(json.get(field).is_some(), "missing {field}");
    }
    assert_eq!(json["status"], "paused");
    assert_eq!(json["callStack"][0]["functionName"], "<module>");
}

#[test]
fn concurrent_sessions_step_in_parallel() {
    let registry = registry();
    let ids: Vec<String> = (0..4)
        .map(|i| registry.create_session(&format!("n = {i}\nprint(n * 10)\n"), None).id)
        .collect();
    thread::scope(|scope| {
        for (i, id) in ids.iter().enumerate() {
            let registry = &registry;
            scope.spawn(move || {
                let state = registry.run_to_completion(id).unwrap();
                assert_eq!(state.output, vec![(i * 10).to_string()]);
            });
        }
    });
}

// ============================================================================
// Listing & expiry
// ============================================================================

#[test]
fn list_sessions_is_sorted_by_id() {
    let registry = registry();
    let first = registry.create_session(PROGRAM, None).id;
    let second = registry.create_session(PROGRAM, None).id;
    registry.start_execution(&second).unwrap();

    let summaries = registry.list_sessions();
    let mut expected = vec![first.clone(), second.clone()];
    expected.sort();
    let ids: Vec<String> = summaries.iter().map(|summary| summary.id.clone()).collect();
    assert_eq!(ids, expected);
    let paused = summaries.iter().find(|summary| summary.id == second).unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);
    assert_eq!(paused.current_line, 1);
}

#[test]
fn sweep_removes_idle_sessions() {
    let registry = SessionRegistry::new(DebugLimits::new().session_ttl(Duration::from_millis(50)));
    let stale = registry.create_session(PROGRAM, None).id;
    thread::sleep(Duration::from_millis(120));
    let fresh = registry.create_session(PROGRAM, None).id;

    assert_eq!(registry.sweep_expired(), 1);
    assert!(registry.get_session(&stale).is_err());
    assert!(registry.get_session(&fresh).is_ok());
}

#[test]
fn sweep_keeps_recently_touched_sessions() {
    let registry = SessionRegistry::new(DebugLimits::new().session_ttl(Duration::from_secs(60)));
    let id = registry.create_session(PROGRAM, None).id;
    registry.start_execution(&id).unwrap();
    assert_eq!(registry.sweep_expired(), 0);
    assert_eq!(registry.len(), 1);
}
