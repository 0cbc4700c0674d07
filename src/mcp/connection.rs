//! Transport-agnostic connection seam.
//!
//! The pool only ever talks to `dyn McpConnection`; `Connector` produces them.
//! `DefaultConnector` picks the HTTP or stdio implementation from the server
//! descriptor, tests plug in scripted fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use super::error::{McpError, McpResult};
use super::http::HttpConnection;
use super::jsonrpc::{RpcMessage, METHOD_NOT_FOUND};
use super::registry::{ServerConfig, ServerTransport};
use super::stdio::StdioConnection;

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_schema")]
    #[schema(value_type = Object)]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// What the server told us during `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub protocol_version: Option<String>,
}

impl ServerInfo {
    pub fn from_initialize(result: &Value) -> Self {
        let text = |ptr: &str| result.pointer(ptr).and_then(|v| v.as_str()).map(String::from);
        Self {
            name: text("/serverInfo/name"),
            version: text("/serverInfo/version"),
            protocol_version: text("/protocolVersion"),
        }
    }
}

/// Outcome of a `tools/call` that reached the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Concatenated text parts, or the raw content when none are text.
    pub text: String,
    #[schema(value_type = Object)]
    pub content: Value,
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn from_result(result: &Value) -> Self {
        let is_error = result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false);
        let content = result.get("content").cloned().unwrap_or(Value::Null);

        let texts: Vec<&str> = content
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|c| c.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|c| c.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let text = if !texts.is_empty() {
            texts.join("\n")
        } else if content.is_null() {
            result.to_string()
        } else {
            content.to_string()
        };

        Self {
            text,
            content,
            is_error,
        }
    }
}

/// A live, initialized session with one MCP server.
#[async_trait]
pub trait McpConnection: Send + Sync {
    async fn list_tools(&self) -> McpResult<Vec<ToolInfo>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolCallResult>;

    /// Lightweight liveness check.
    async fn ping(&self) -> McpResult<()>;

    /// Release the underlying transport. Idempotent.
    async fn close(&self);

    /// `false` once the transport is known to be gone.
    fn is_alive(&self) -> bool;
}

/// A freshly established connection plus its handshake metadata.
pub struct Established {
    pub connection: Arc<dyn McpConnection>,
    pub info: ServerInfo,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the transport and complete the `initialize` handshake.
    /// `timeout` also bounds `tools/list` and `ping` on the returned
    /// connection; `tools/call` is bounded by the caller.
    async fn connect(&self, config: &ServerConfig, timeout: Duration) -> McpResult<Established>;
}

pub struct DefaultConnector {
    client: reqwest::Client,
}

impl DefaultConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, config: &ServerConfig, timeout: Duration) -> McpResult<Established> {
        match &config.transport {
            ServerTransport::Http { url, auth_token } => {
                HttpConnection::connect(
                    self.client.clone(),
                    &config.key,
                    url,
                    auth_token.clone(),
                    timeout,
                )
                .await
            }
            ServerTransport::Stdio { command, args, env } => {
                StdioConnection::spawn(&config.key, command, args, env, timeout).await
            }
        }
    }
}

// ── Shared decoding helpers ─────────────────────────────────────────────────

/// Turn a JSON-RPC response into its `result`, mapping protocol errors.
pub(crate) fn into_result(server: &str, msg: RpcMessage) -> McpResult<Value> {
    if let Some(err) = msg.error {
        return Err(McpError::Execution {
            server: server.to_string(),
            message: err.message,
            code: Some(err.code),
        });
    }
    Ok(msg.result.unwrap_or(Value::Null))
}

pub(crate) fn parse_tools(server: &str, result: &Value) -> McpResult<Vec<ToolInfo>> {
    let raw = result
        .get("tools")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    serde_json::from_value(raw)
        .map_err(|e| McpError::connection(server, format!("malformed tools/list result: {e}")))
}

/// Servers that do not implement `ping` still answered, so they are alive.
pub(crate) fn ping_outcome(result: McpResult<Value>) -> McpResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(McpError::Execution { code: Some(METHOD_NOT_FOUND), .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_content() {
        let result = ToolCallResult::from_result(&json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "line two"}
            ]
        }));
        assert_eq!(result.text, "line one\nline two");
        assert!(!result.is_error);
    }

    #[test]
    fn keeps_error_flag_and_raw_content() {
        let result = ToolCallResult::from_result(&json!({
            "content": [{"type": "resource", "uri": "file:///x"}],
            "isError": true
        }));
        assert!(result.is_error);
        assert!(result.text.contains("file:///x"));
    }

    #[test]
    fn parses_tool_list_with_defaults() {
        let tools = parse_tools("fs", &json!({"tools": [{"name": "read"}]})).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, None);
        assert_eq!(tools[0].input_schema["type"], "object");

        assert!(parse_tools("fs", &json!({"tools": [{"description": "no name"}]})).is_err());
        assert!(parse_tools("fs", &json!({})).unwrap().is_empty());
    }

    #[test]
    fn method_not_found_ping_counts_as_alive() {
        let err = McpError::Execution {
            server: "fs".into(),
            message: "Method not found".into(),
            code: Some(METHOD_NOT_FOUND),
        };
        assert!(ping_outcome(Err(err)).is_ok());
        assert!(ping_outcome(Err(McpError::connection("fs", "reset"))).is_err());
    }

    #[test]
    fn reads_server_info() {
        let info = ServerInfo::from_initialize(&json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {"name": "files", "version": "1.2.0"}
        }));
        assert_eq!(info.version.as_deref(), Some("1.2.0"));
        assert_eq!(info.protocol_version.as_deref(), Some("2024-11-05"));
    }
}
