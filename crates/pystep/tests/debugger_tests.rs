//! Integration tests for single debugging sessions: stepping, breakpoints,
//! error classification and variable capture.

use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use pretty_assertions::assert_eq;
use pystep::debugger::{
    DebugLimits, DebugSession, ErrorKind, SessionRegistry, SessionState, SessionStatus, VariableEntry,
};

const SUM_PROGRAM: &str = "a = 1\nb = 2\nc = a + b\nprint(f\"Result: {c}\")\n";

const FACTORIAL: &str = "\
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)
print(fact(4))
";

fn session(code: &str) -> DebugSession {
    session_with(code, DebugLimits::new())
}

fn session_with(code: &str, limits: DebugLimits) -> DebugSession {
    DebugSession::new("test".to_owned(), code, None, BTreeSet::new(), limits)
}

fn names(entries: &[VariableEntry]) -> Vec<&str> {
    entries.iter().map(|entry| entry.name.as_str()).collect()
}

fn value_of<'a>(entries: &'a [VariableEntry], name: &str) -> Option<&'a VariableEntry> {
    entries.iter().rev().find(|entry| entry.name == name)
}

/// Steps until the session finishes, returning every state seen on the way.
fn step_to_end(session: &DebugSession) -> Vec<SessionState> {
    let mut states = vec![session.start_execution()];
    while !states.last().is_some_and(|state| state.is_finished) {
        assert!(states.len() < 500, "program did not finish");
        states.push(session.step_forward());
    }
    states
}

// ============================================================================
// Creation
// ============================================================================

#[test]
fn new_session_has_not_started() {
    let session = session(SUM_PROGRAM);
    let state = session.state();
    assert_eq!(state.current_line, -1);
    assert!(!state.has_started);
    assert!(!state.is_finished);
    assert_eq!(state.status, SessionStatus::NotStarted);
    assert!(state.variables.is_empty());
    assert!(state.output.is_empty());
    assert_eq!(state.error, None);
}

#[test]
fn source_is_dedented() {
    let session = session("    a = 1\n    print(a)\n");
    assert_eq!(session.source(), "a = 1\nprint(a)\n");
    let state = session.run_to_completion();
    assert_eq!(state.output, vec!["1".to_owned()]);
    assert_eq!(state.error, None);
}

#[test]
fn artifact_holds_the_source_and_is_removed_on_drop() {
    let session = session("  x = 1\n");
    let path: PathBuf = session.artifact_path().unwrap().to_owned();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("debug_"), "{name}");
    assert!(name.ends_with(".py"), "{name}");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "x = 1\n");
    drop(session);
    assert!(!path.exists());
}

// ============================================================================
// Stepping
// ============================================================================

#[test]
fn start_pauses_before_the_first_line() {
    let session = session(SUM_PROGRAM);
    let state = session.start_execution();
    assert_eq!(state.status, SessionStatus::Paused);
    assert_eq!(state.current_line, 1);
    assert!(state.has_started);
    assert!(state.variables.is_empty());
    assert_eq!(state.call_stack.len(), 1);
    assert_eq!(state.call_stack[0].function_name, "<module>");
    assert_eq!(state.call_stack[0].line, 1);
    assert_eq!(
        Some(state.call_stack[0].file.as_str()),
        session.artifact_path().and_then(|path| path.to_str())
    );
}

#[test]
fn start_twice_is_a_no_op() {
    let session = session(SUM_PROGRAM);
    let first = session.start_execution();
    let second = session.start_execution();
    assert_eq!(first, second);
}

#[test]
fn each_step_advances_one_line_and_logs_variables() {
    let session = session(SUM_PROGRAM);
    session.start_execution();

    let state = session.step_forward();
    assert_eq!(state.current_line, 2);
    assert_eq!(names(&state.variables), vec!["a"]);
    assert_eq!(state.variables[0].line, 2);
    assert_eq!(state.variables[0].type_name, "int");
    assert_eq!(state.variables[0].value, "1");

    let state = session.step_forward();
    assert_eq!(state.current_line, 3);
    assert_eq!(names(&state.variables), vec!["a", "a", "b"]);

    let state = session.step_forward();
    assert_eq!(state.current_line, 4);
    assert_eq!(value_of(&state.variables, "c").map(|entry| entry.value.as_str()), Some("3"));

    let state = session.step_forward();
    assert!(state.is_finished);
    assert_eq!(state.status, SessionStatus::FinishedOk);
    assert_eq!(state.output, vec!["Result: 3".to_owned()]);
}

#[test]
fn stepping_a_finished_session_changes_nothing() {
    let session = session("x = 1\n");
    let finished = session.run_to_completion();
    assert!(finished.is_finished);
    assert_eq!(session.step_forward(), finished);
    assert_eq!(session.continue_execution(), finished);
}

#[test]
fn step_forward_starts_a_new_session() {
    let session = session(SUM_PROGRAM);
    let state = session.step_forward();
    assert!(state.has_started);
    assert_eq!(state.current_line, 1);
}

#[test]
fn loop_headers_pause_on_every_iteration() {
    let session = session("total = 0\nfor i in range(2):\n    total += i\nprint(total)\n");
    let lines: Vec<i64> = step_to_end(&session)
        .iter()
        .filter(|state| !state.is_finished)
        .map(|state| state.current_line)
        .collect();
    assert_eq!(lines, vec![1, 2, 3, 2, 3, 2, 4]);
}

#[test]
fn partial_output_lines_are_visible_while_paused() {
    let session = session("print('a', end='')\nprint('b')\n");
    session.start_execution();
    let state = session.step_forward();
    assert_eq!(state.output, vec!["a".to_owned()]);
    let state = session.step_forward();
    assert_eq!(state.output, vec!["ab".to_owned()]);
}

#[test]
fn library_code_is_stepped_over() {
    let code = "\
import heapq
h = []
for x in [5, 1, 3]:
    heapq.heappush(h, x)
smallest = heapq.heappop(h)
";
    let session = session(code);
    let artifact = session.artifact_path().and_then(|path| path.to_str()).unwrap().to_owned();
    let states = step_to_end(&session);
    for state in states.iter().filter(|state| !state.is_finished) {
        assert!((1..=5).contains(&state.current_line), "paused at {}", state.current_line);
        let innermost = state.call_stack.last().unwrap();
        assert_eq!(innermost.file, artifact);
    }
    let last = states.last().unwrap();
    assert_eq!(last.error, None);
    assert_eq!(value_of(&last.variables, "smallest").map(|entry| entry.value.as_str()), Some("1"));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn division_by_zero_is_a_runtime_error() {
    let session = session("x = 10\ny = 0\nz = x / y\n");
    let state = session.run_to_completion();
    assert!(state.is_finished);
    assert_eq!(state.status, SessionStatus::FinishedError);
    assert_eq!(state.current_line, 3);
    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Runtime);
    assert_eq!(error.exc_type, "ZeroDivisionError");
    assert_eq!(error.to_string(), "ZeroDivisionError: division by zero");
    assert!(value_of(&state.variables, "y").is_some());
    assert!(value_of(&state.variables, "z").is_none());
}

#[test]
fn error_inside_a_function_reports_the_function_line() {
    let session = session("def f(x):\n    return 10 / x\nf(0)\n");
    let state = session.run_to_completion();
    assert_eq!(state.current_line, 2);
    assert_eq!(state.error.map(|error| error.exc_type), Some("ZeroDivisionError".to_owned()));
}

#[test]
fn error_inside_library_code_keeps_the_artifact_line() {
    let session = session("import heapq\nheapq.heappop([])\n");
    let state = session.run_to_completion();
    assert!(state.is_finished);
    assert_eq!(state.current_line, 2);
    let error = state.error.unwrap();
    assert_eq!(error.exc_type, "IndexError");
    assert_eq!(error.message, "pop from empty list");
}

#[test]
fn syntax_error_finishes_without_stepping() {
    let session = session("print(\"hello)\n");
    let state = session.run_to_completion();
    assert!(state.is_finished);
    assert!(state.has_started);
    assert_eq!(state.current_line, -1);
    assert!(state.variables.is_empty());
    assert!(state.call_stack.is_empty());
    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Syntax);
    assert_eq!(error.exc_type, "SyntaxError");
    assert_eq!(error.line, Some(1));
}

#[test]
fn unsupported_features_are_classified_as_syntax_errors() {
    let session = session("with open('f') as f:\n    pass\n");
    let error = session.start_execution().error.unwrap();
    assert_eq!(error.kind, ErrorKind::Syntax);
    assert_eq!(error.exc_type, "NotImplementedError");
}

#[test]
fn empty_source_finishes_immediately() {
    for code in ["", "   \n\t\n"] {
        let state = session(code).start_execution();
        assert!(state.is_finished);
        assert_eq!(state.status, SessionStatus::FinishedOk);
        assert!(state.output.is_empty());
        assert_eq!(state.error, None);
    }
}

#[test]
fn clean_sys_exit_is_not_an_error() {
    let state = session("import sys\nprint('bye')\nsys.exit(0)\nprint('never')\n").run_to_completion();
    assert_eq!(state.status, SessionStatus::FinishedOk);
    assert_eq!(state.output, vec!["bye".to_owned()]);
}

#[test]
fn step_timeout_finishes_with_a_timeout_error() {
    let limits = DebugLimits::new().step_timeout(Duration::from_millis(200));
    let session = session_with("while True:\n    pass\n", limits);
    let state = session.continue_execution();
    assert!(state.is_finished);
    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(error.exc_type, "TimeoutError");
    assert_eq!(error.message, "Timeout waiting for next step");
    assert_eq!(session.step_forward().status, SessionStatus::FinishedError);
}

#[test]
fn finally_block_runs_before_the_error_is_reported() {
    let session = session("try:\n    x = 1 / 0\nfinally:\n    y = 2\n");
    let states = step_to_end(&session);
    for state in &states {
        assert_eq!(state.error.is_some(), state.is_finished, "error without finish at line {}", state.current_line);
    }
    let paused: Vec<i64> = states[..states.len() - 1].iter().map(|state| state.current_line).collect();
    assert_eq!(paused, vec![1, 2, 4]);

    let last = states.last().unwrap();
    assert_eq!(last.status, SessionStatus::FinishedError);
    assert_eq!(last.current_line, 2);
    assert_eq!(last.error.as_ref().map(|error| error.exc_type.as_str()), Some("ZeroDivisionError"));
    assert_eq!(value_of(&last.variables, "y").map(|entry| entry.value.as_str()), Some("2"));
    assert_eq!(session.step_forward().status, SessionStatus::FinishedError);
}

#[test]
fn return_in_finally_swallows_the_error() {
    let code = "\
def f():
    try:
        return 1 / 0
    finally:
        return 5
print(f())
";
    let state = session(code).run_to_completion();
    assert_eq!(state.status, SessionStatus::FinishedOk);
    assert_eq!(state.error, None);
    assert_eq!(state.output, vec!["5".to_owned()]);
}

#[test]
fn error_escaping_an_unmatched_handler_reports_the_raising_frame() {
    let code = "\
def g():
    x = 1
    return 1 / 0
try:
    g()
except ValueError:
    pass
";
    let state = session(code).run_to_completion();
    assert!(state.is_finished);
    assert_eq!(state.current_line, 3);
    assert_eq!(state.error.map(|error| error.exc_type), Some("ZeroDivisionError".to_owned()));
    let x = value_of(&state.variables, "x").unwrap();
    assert_eq!(x.value, "1");
    assert_eq!(x.line, 3);
}

#[test]
fn raised_recursion_limit_stays_within_the_worker_stack() {
    let code = "\
import sys
sys.setrecursionlimit(1000000)
def f(n):
    return f(n + 1)
f(0)
";
    let state = session(code).continue_execution();
    assert!(state.is_finished);
    let error = state.error.unwrap();
    assert_eq!(error.exc_type, "RecursionError");
    assert_eq!(error.message, "maximum recursion depth exceeded");
}

// ============================================================================
// Breakpoints
// ============================================================================

#[test]
fn run_to_completion_stops_at_a_breakpoint() {
    let session = session("a = 1\nb = 2\nc = a + b\nprint(c)\n");
    session.toggle_breakpoint(3);
    let state = session.run_to_completion();
    assert!(!state.is_finished);
    assert_eq!(state.current_line, 3);
    assert!(state.breakpoint_hit);
    let latest = session.latest_variables();
    assert_eq!(names(&latest), vec!["a", "b"]);
    assert!(state.output.is_empty());

    let state = session.run_to_completion();
    assert!(state.is_finished);
    assert_eq!(state.output, vec!["3".to_owned()]);
}

#[test]
fn run_to_completion_respects_the_step_ceiling() {
    let limits = DebugLimits::new().max_run_steps(3);
    let session = session_with("while True:\n    x = 1\n", limits);
    let state = session.run_to_completion();
    assert!(!state.is_finished);
    assert_eq!(state.status, SessionStatus::Paused);
    assert_eq!(state.error, None);
}

#[test]
fn run_to_completion_finishing_on_a_breakpoint_line_reports_a_pause() {
    let session = session("a = 1\nb = 2\n");
    session.toggle_breakpoint(2);
    let state = session.run_to_completion();
    assert_eq!(state.current_line, 2);
    assert!(!state.is_finished);

    let state = session.run_to_completion();
    assert_eq!(state.current_line, 2);
    assert!(!state.is_finished);
    assert_eq!(state.status, SessionStatus::Paused);
    assert!(state.breakpoint_hit);
    assert_eq!(state.error, None);

    assert!(session.state().is_finished);
    let state = session.run_to_completion();
    assert!(state.is_finished);
    assert_eq!(state.status, SessionStatus::FinishedOk);
}

#[test]
fn continue_runs_between_breakpoints() {
    let session = session("total = 0\nfor i in range(3):\n    total += i\nprint(total)\n");
    session.toggle_breakpoint(3);

    let state = session.continue_execution();
    assert_eq!(state.current_line, 3);
    assert!(state.breakpoint_hit);
    assert_eq!(value_of(&state.variables, "i").map(|entry| entry.value.as_str()), Some("0"));

    let state = session.continue_execution();
    assert_eq!(state.current_line, 3);
    assert_eq!(value_of(&state.variables, "i").map(|entry| entry.value.as_str()), Some("1"));

    session.continue_execution();
    let state = session.continue_execution();
    assert!(state.is_finished);
    assert_eq!(state.output, vec!["3".to_owned()]);
}

#[test]
fn continue_without_breakpoints_runs_to_the_end() {
    let state = session(FACTORIAL).continue_execution();
    assert!(state.is_finished);
    assert_eq!(state.output, vec!["24".to_owned()]);
}

#[test]
fn toggling_twice_restores_the_breakpoints() {
    let session = session(SUM_PROGRAM);
    session.toggle_breakpoint(2);
    let before = session.breakpoints();
    assert_eq!(session.toggle_breakpoint(4).breakpoints, vec![2, 4]);
    assert_eq!(session.toggle_breakpoint(4), before);
}

#[test]
fn breakpoint_flag_is_set_on_single_steps() {
    let session = session(SUM_PROGRAM);
    session.toggle_breakpoint(2);
    assert!(!session.start_execution().breakpoint_hit);
    assert!(session.step_forward().breakpoint_hit);
    assert!(!session.step_forward().breakpoint_hit);
}

#[test]
fn renewed_session_keeps_id_source_and_breakpoints() {
    let session = session(SUM_PROGRAM);
    session.toggle_breakpoint(3);
    session.run_to_completion();

    let fresh = session.renewed();
    let state = fresh.state();
    assert_eq!(state.id, "test");
    assert_eq!(state.breakpoints, vec![3]);
    assert_eq!(state.current_line, -1);
    assert!(!state.has_started);
    assert!(state.variables.is_empty());
    assert_eq!(fresh.run_to_completion().current_line, 3);
}

// ============================================================================
// Capture
// ============================================================================

#[test]
fn recursive_functions_are_detected() {
    let states = step_to_end(&session(FACTORIAL));
    let deepest = states.iter().max_by_key(|state| state.call_stack.len()).unwrap();
    let functions: Vec<&str> = deepest.call_stack.iter().map(|entry| entry.function_name.as_str()).collect();
    assert_eq!(functions, vec!["<module>", "fact", "fact", "fact", "fact"]);
    assert_eq!(deepest.recursive_functions, vec!["fact".to_owned()]);
    let depths: Vec<usize> = deepest.call_stack.iter().map(|entry| entry.recursion_depth).collect();
    assert_eq!(depths, vec![1, 4, 3, 2, 1]);
    assert_eq!(deepest.call_stack[4].locals["n"].value, "1");

    let shallow = states.iter().find(|state| state.call_stack.len() == 2).unwrap();
    assert!(shallow.recursive_functions.is_empty());
    assert_eq!(states.last().unwrap().output, vec!["24".to_owned()]);
}

#[test]
fn values_are_formatted_for_display() {
    let code = "\
xs = list(range(20))
d = {'k': 1}
import math
class P:
    pass
p = P()
done = True
";
    let session = session(code);
    let state = session.run_to_completion();
    assert_eq!(state.error, None);
    let latest = session.latest_variables();
    let find = |name: &str| latest.iter().find(|entry| entry.name == name).cloned().unwrap();
    assert_eq!(find("xs").value, "list with 20 items");
    assert_eq!(find("d").value, "{'k': 1}");
    assert_eq!(find("p").type_name, "P");
    assert_eq!(find("p").value, "P object");
    assert_eq!(find("P").value, "type object");
    assert_eq!(find("done").value, "True");
    assert!(latest.iter().all(|entry| entry.name != "math"));
    assert!(latest.iter().all(|entry| !entry.name.starts_with("__")));
}

#[test]
fn function_frames_see_locals_and_globals() {
    let code = "\
g = 5
def f(a):
    b = a + g
    return b
f(1)
";
    let session = session(code);
    let mut state = session.start_execution();
    while state.current_line != 4 {
        state = session.step_forward();
    }
    let captured: Vec<&str> = state
        .variables
        .iter()
        .filter(|entry| entry.line == 4)
        .map(|entry| entry.name.as_str())
        .collect();
    assert_eq!(captured, vec!["a", "b", "g", "f"]);
    assert_eq!(state.call_stack[1].function_name, "f");
    assert_eq!(state.call_stack[1].locals.keys().collect::<Vec<_>>(), vec!["a", "b"]);
}

#[test]
fn test_case_feeds_input() {
    let session = DebugSession::new(
        "io".to_owned(),
        "n = int(input())\nprint(n * 2)\n",
        Some("21\n".to_owned()),
        BTreeSet::new(),
        DebugLimits::new(),
    );
    assert_eq!(session.run_to_completion().output, vec!["42".to_owned()]);
}

#[test]
fn sessions_are_independent() {
    let registry = SessionRegistry::new(DebugLimits::new());
    let first = registry.create_session("print('one')\nx = 1\n", None).id;
    let second = registry.create_session("print('two')\ny = 2\n", None).id;
    registry.start_execution(&first).unwrap();
    registry.start_execution(&second).unwrap();
    let one = registry.step_forward(&first).unwrap();
    let two = registry.run_to_completion(&second).unwrap();
    assert_eq!(one.output, vec!["one".to_owned()]);
    assert!(!one.is_finished);
    assert_eq!(two.output, vec!["two".to_owned()]);
    assert!(two.is_finished);
}
