//! Serializable snapshots of a session, as returned by every registry operation.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{CompileError, Exception};

use super::format::FormattedValue;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    /// Waiting at a line for the next resume request.
    Paused,
    /// The worker is executing between two pauses.
    Running,
    FinishedOk,
    FinishedError,
}

impl SessionStatus {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::FinishedOk | Self::FinishedError)
    }
}

/// Classification of a session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ErrorKind {
    /// The source failed to compile; no line ever ran.
    Syntax,
    /// An uncaught exception while running.
    Runtime,
    /// The caller gave up waiting for the worker.
    Timeout,
}

/// The structured error of a finished session.
///
/// Displays as `"<excType>: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// Python exception class name, e.g. `ZeroDivisionError`.
    pub exc_type: String,
    pub message: String,
    /// Source line of a syntax error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl ErrorInfo {
    pub(crate) fn syntax(err: &CompileError) -> Self {
        Self {
            kind: ErrorKind::Syntax,
            exc_type: err.exc_type.to_string(),
            message: err.message.clone(),
            line: Some(err.line),
        }
    }

    pub(crate) fn runtime(exc: &Exception) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            exc_type: exc.type_name().to_owned(),
            message: exc.message().to_owned(),
            line: None,
        }
    }

    pub(crate) fn timeout(message: &str) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            exc_type: "TimeoutError".to_owned(),
            message: message.to_owned(),
            line: None,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exc_type, self.message)
    }
}

/// One binding captured at a pause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: String,
    /// The session's current line when the binding was captured.
    pub line: i64,
}

/// One frame of a captured call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackEntry {
    pub function_name: String,
    pub line: u32,
    pub file: String,
    /// How many times this function name had been seen, counting from the
    /// innermost frame, when this frame was reached.
    pub recursion_depth: usize,
    pub locals: IndexMap<String, FormattedValue>,
}

/// Everything a caller can observe about a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: String,
    /// Line of the latest pause, `-1` before the first one.
    pub current_line: i64,
    pub variables: Vec<VariableEntry>,
    pub has_started: bool,
    pub is_finished: bool,
    pub output: Vec<String>,
    pub error: Option<ErrorInfo>,
    pub breakpoints: Vec<u32>,
    /// Outermost frame first.
    pub call_stack: Vec<StackEntry>,
    pub recursive_functions: Vec<String>,
    pub status: SessionStatus,
    /// Whether the current pause is at a breakpoint.
    pub breakpoint_hit: bool,
}

/// Result of `toggle_breakpoint` and `get_breakpoints`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoints {
    pub breakpoints: Vec<u32>,
}

/// One row of `list_sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub status: SessionStatus,
    pub current_line: i64,
    /// Whole seconds since an operation last named this session.
    pub idle_secs: u64,
}

/// Keeps the last entry for every name, ordered by the name's first appearance.
#[must_use]
pub fn latest_by_name(log: &[VariableEntry]) -> Vec<VariableEntry> {
    let mut latest: IndexMap<&str, &VariableEntry> = IndexMap::new();
    for entry in log {
        latest.insert(&entry.name, entry);
    }
    latest.into_values().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExcType;

    fn entry(name: &str, value: &str, line: i64) -> VariableEntry {
        VariableEntry {
            name: name.to_owned(),
            type_name: "int".to_owned(),
            value: value.to_owned(),
            line,
        }
    }

    #[test]
    fn latest_keeps_first_position_and_last_value() {
        let log = vec![entry("a", "1", 2), entry("b", "2", 3), entry("a", "5", 4)];
        let latest = latest_by_name(&log);
        assert_eq!(latest, vec![entry("a", "5", 4), entry("b", "2", 3)]);
    }

    #[test]
    fn error_display_and_serialization() {
        let exc = Exception::new(ExcType::ZeroDivisionError, Some("division by zero".to_owned()));
        let info = ErrorInfo::runtime(&exc);
        assert_eq!(info.to_string(), "ZeroDivisionError: division by zero");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["kind"], "runtime");
        assert_eq!(json["excType"], "ZeroDivisionError");
        assert!(json.get("line").is_none());
    }

    #[test]
    fn status_names() {
        assert_eq!(SessionStatus::FinishedOk.to_string(), "finishedOk");
        assert!(SessionStatus::FinishedError.is_finished());
        assert!(!SessionStatus::Paused.is_finished());
    }
}
