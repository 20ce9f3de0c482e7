//! JSON-RPC 2.0 dispatch and `Content-Length` framing.

use std::io::{self, BufRead, Write};

use serde::Deserialize;
use serde_json::{Value, json};

use crate::handler::McpHandler;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC request payload used by this minimal MCP server.
#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Handles one decoded message. Returns `None` for notifications, which get
/// no response.
#[must_use]
pub fn handle_message(handler: &McpHandler, message: Value) -> Option<Value> {
    if is_json_rpc_notification(&message) {
        tracing::debug!(method = message.get("method").and_then(serde_json::Value::as_str), "notification");
        return None;
    }
    let response = match serde_json::from_value::<RpcRequest>(message) {
        Ok(request) => handle_request(handler, request),
        Err(err) => error_response(&Value::Null, -32700, &format!("parse error: {err}")),
    };
    Some(response)
}

/// Returns true when the payload is a JSON-RPC 2.0 notification.
///
/// Notifications contain a string `method` and omit `id`.
fn is_json_rpc_notification(payload: &Value) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };

    object.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
        && object.get("method").is_some_and(Value::is_string)
        && !object.contains_key("id")
}

fn handle_request(handler: &McpHandler, request: RpcRequest) -> Value {
    match request.method.as_str() {
        "initialize" => success_response(
            &request.id,
            &json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "pystep-mcp",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),
        "tools/list" => success_response(&request.id, &json!({ "tools": handler.list_tools() })),
        "tools/call" => {
            #[derive(Deserialize)]
            struct CallParams {
                name: String,
                #[serde(default)]
                arguments: Value,
            }

            let params: Result<CallParams, _> = serde_json::from_value(request.params);
            match params {
                Ok(params) => match handler.call_tool(&params.name, params.arguments) {
                    Ok(result) => success_response(&request.id, &json!({ "content": result })),
                    Err(err) => {
                        tracing::debug!(tool = params.name, %err, "tool call failed");
                        error_response(&request.id, err.code(), &err.to_string())
                    }
                },
                Err(err) => error_response(&request.id, -32602, &format!("invalid params: {err}")),
            }
        }
        _ => error_response(&request.id, -32601, "method not found"),
    }
}

fn success_response(id: &Value, result: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}

/// Builds the response for a body that is not valid JSON.
#[must_use]
pub fn parse_error(err: &serde_json::Error) -> Value {
    error_response(&Value::Null, -32700, &format!("parse error: {err}"))
}

/// Reads one `Content-Length` framed message body. Returns `None` at end of input.
///
/// # Errors
///
/// Fails on I/O errors and on a missing or malformed `Content-Length` header.
pub fn read_framed_message(reader: &mut impl BufRead) -> io::Result<Option<Vec<u8>>> {
    let mut content_length = None;
    loop {
        let mut header_line = String::new();
        let read = reader.read_line(&mut header_line)?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = header_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            let length = value
                .trim()
                .parse::<usize>()
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("invalid Content-Length: {err}")))?;
            content_length = Some(length);
        }
    }

    let Some(content_length) = content_length else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header"));
    };

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

/// Writes one `Content-Length` framed JSON message.
///
/// # Errors
///
/// Fails on I/O errors.
pub fn write_framed_message(writer: &mut impl Write, payload: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(payload)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("serialize error: {err}")))?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, sync::Arc};

    use pystep::debugger::{DebugLimits, SessionRegistry};

    use super::*;

    fn handler() -> McpHandler {
        McpHandler::new(Arc::new(SessionRegistry::new(DebugLimits::new())))
    }

    #[test]
    fn framing_round_trip() {
        let mut buffer = Vec::new();
        write_framed_message(&mut buffer, &json!({"a": 1})).unwrap();
        write_framed_message(&mut buffer, &json!([true])).unwrap();
        let mut reader = Cursor::new(buffer);
        assert_eq!(read_framed_message(&mut reader).unwrap(), Some(br#"{"a":1}"#.to_vec()));
        assert_eq!(read_framed_message(&mut reader).unwrap(), Some(b"[true]".to_vec()));
        assert_eq!(read_framed_message(&mut reader).unwrap(), None);
    }

    #[test]
    fn missing_content_length_is_an_error() {
        let mut reader = Cursor::new(b"X-Other: 1\r\n\r\n{}".to_vec());
        let err = read_framed_message(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn notifications_get_no_response() {
        let message = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert_eq!(handle_message(&handler(), message), None);
    }

    #[test]
    fn initialize_reports_server_info() {
        let message = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        let response = handle_message(&handler(), message).unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["serverInfo"]["name"], "pystep-mcp");
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
    }

    #[test]
    fn unknown_method() {
        let message = json!({"jsonrpc": "2.0", "id": 2, "method": "resources/list"});
        let response = handle_message(&handler(), message).unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[test]
    fn unknown_session_maps_to_not_found_code() {
        let message = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "get_session", "arguments": {"session_id": "nope"}}
        });
        let response = handle_message(&handler(), message).unwrap();
        assert_eq!(response["error"]["code"], -32004);
        assert_eq!(response["error"]["message"], "session not found: nope");
    }
}
