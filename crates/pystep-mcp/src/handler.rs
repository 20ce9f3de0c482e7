use std::{fmt, sync::Arc};

use pystep::debugger::{DebugError, SessionRegistry};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

// =============================================================================
// Public types
// =============================================================================

/// Static MCP tool metadata exposed by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name used by `tools/call`.
    pub name: String,
    /// Human-readable description for clients.
    pub description: String,
}

/// A failed tool call, carrying its JSON-RPC error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The named session does not exist.
    NotFound(String),
    /// The arguments did not match the tool's schema.
    InvalidArguments(String),
    /// No tool has the requested name.
    UnknownTool(String),
}

impl ToolError {
    /// JSON-RPC error code for this failure.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::NotFound(_) => -32004,
            Self::InvalidArguments(_) => -32602,
            Self::UnknownTool(_) => -32000,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "session not found: {id}"),
            Self::InvalidArguments(msg) => write!(f, "invalid arguments: {msg}"),
            Self::UnknownTool(name) => write!(f, "unknown tool '{name}'"),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<DebugError> for ToolError {
    fn from(error: DebugError) -> Self {
        match error {
            DebugError::NotFound(id) => Self::NotFound(id),
        }
    }
}

// =============================================================================
// McpHandler
// =============================================================================

/// Thin MCP adapter around [`SessionRegistry`].
///
/// Each tool parses its JSON arguments, calls the matching registry
/// operation and serializes the result back to JSON. The registry is shared
/// so the binary can sweep expired sessions from another thread.
#[derive(Debug, Clone)]
pub struct McpHandler {
    registry: Arc<SessionRegistry>,
}

#[derive(Deserialize)]
struct SessionArgs {
    session_id: String,
}

impl McpHandler {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the tools supported by this handler.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        vec![
            tool(
                "create_session",
                "Create a debugging session for Python source. Optional test_case lines feed input().",
            ),
            tool("get_session", "Get the full state of a session."),
            tool("delete_session", "Delete a session and release its resources."),
            tool(
                "reset_session",
                "Restart a session from the beginning, keeping its source and breakpoints.",
            ),
            tool("start_execution", "Start running a session and pause at its first line."),
            tool("step_forward", "Execute the current line and pause at the next one."),
            tool(
                "run_to_completion",
                "Step until the program finishes or reaches a breakpoint line.",
            ),
            tool(
                "continue_execution",
                "Run without pausing until the next breakpoint or the end of the program.",
            ),
            tool("toggle_breakpoint", "Add or remove a breakpoint at a source line."),
            tool("get_breakpoints", "List the breakpoints of a session."),
            tool("get_variables", "Get the chronological log of captured variables."),
            tool("get_latest_variables", "Get the latest captured value of every variable."),
            tool("get_execution_state", "Get the current execution state of a session."),
            tool("list_sessions", "List all live sessions."),
        ]
    }

    /// Dispatches one tool call by name.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::UnknownTool` for an unknown name,
    /// `ToolError::InvalidArguments` for malformed arguments and
    /// `ToolError::NotFound` for an unknown session id.
    pub fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value, ToolError> {
        tracing::debug!(tool = tool_name, "tool call");
        let registry = &*self.registry;
        match tool_name {
            "create_session" => self.create_session_tool(arguments),
            "get_session" => to_json(&registry.get_session(&session_id(arguments)?)?),
            "delete_session" => {
                let id = session_id(arguments)?;
                Ok(json!({ "deleted": registry.delete_session(&id) }))
            }
            "reset_session" => to_json(&registry.reset_session(&session_id(arguments)?)?),
            "start_execution" => to_json(&registry.start_execution(&session_id(arguments)?)?),
            "step_forward" => to_json(&registry.step_forward(&session_id(arguments)?)?),
            "run_to_completion" => to_json(&registry.run_to_completion(&session_id(arguments)?)?),
            "continue_execution" => to_json(&registry.continue_execution(&session_id(arguments)?)?),
            "toggle_breakpoint" => self.toggle_breakpoint_tool(arguments),
            "get_breakpoints" => to_json(&registry.get_breakpoints(&session_id(arguments)?)?),
            "get_variables" => {
                let variables = registry.get_variables(&session_id(arguments)?)?;
                Ok(json!({ "variables": variables }))
            }
            "get_latest_variables" => {
                let variables = registry.get_latest_variables(&session_id(arguments)?)?;
                Ok(json!({ "variables": variables }))
            }
            "get_execution_state" => to_json(&registry.get_execution_state(&session_id(arguments)?)?),
            "list_sessions" => Ok(json!({ "sessions": registry.list_sessions() })),
            other => Err(ToolError::UnknownTool(other.to_owned())),
        }
    }

    /// Accepts `{"code": "...", "test_case": "..."}` where `test_case` is optional.
    fn create_session_tool(&self, arguments: Value) -> Result<Value, ToolError> {
        #[derive(Deserialize)]
        struct Args {
            code: String,
            test_case: Option<String>,
        }

        let args: Args = parse_args(arguments)?;
        to_json(&self.registry.create_session(&args.code, args.test_case.as_deref()))
    }

    /// Accepts `{"session_id": "...", "line": N}`.
    fn toggle_breakpoint_tool(&self, arguments: Value) -> Result<Value, ToolError> {
        #[derive(Deserialize)]
        struct Args {
            session_id: String,
            line: u32,
        }

        let args: Args = parse_args(arguments)?;
        to_json(&self.registry.toggle_breakpoint(&args.session_id, args.line)?)
    }
}

fn tool(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_owned(),
        description: description.to_owned(),
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|err| ToolError::InvalidArguments(err.to_string()))
}

fn session_id(arguments: Value) -> Result<String, ToolError> {
    parse_args::<SessionArgs>(arguments).map(|args| args.session_id)
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|err| ToolError::InvalidArguments(format!("serialize error: {err}")))
}
