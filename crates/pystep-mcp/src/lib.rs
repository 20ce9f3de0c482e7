//! MCP server support for step-through debugging sessions.
//!
//! [`handler::McpHandler`] maps MCP tool calls onto a shared
//! [`pystep::debugger::SessionRegistry`]. [`protocol`] holds the JSON-RPC
//! request dispatch and the `Content-Length` stdio framing used by the
//! `pystep-mcp` binary.

pub mod handler;
pub mod protocol;
