//! MCP client over HTTP: JSON-RPC 2.0 POSTed to a single endpoint.
//!
//! Replies may be plain JSON or a `text/event-stream` carrying the response
//! as an SSE `data:` frame. The `Mcp-Session-Id` returned by `initialize` is
//! echoed on every subsequent request and released with `DELETE` on close.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};

use super::connection::{
    into_result, parse_tools, ping_outcome, Established, McpConnection, ServerInfo,
    ToolCallResult, ToolInfo,
};
use super::error::{McpError, McpResult};
use super::jsonrpc::{initialize_params, RpcMessage, RpcRequest};

const SESSION_HEADER: &str = "mcp-session-id";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct HttpConnection {
    client: Client,
    server: String,
    url: String,
    auth_token: Option<String>,
    /// Bound on handshake, `tools/list` and `ping`. `tools/call` is bounded
    /// by the caller.
    control_timeout: Duration,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HttpConnection {
    pub async fn connect(
        client: Client,
        server: &str,
        url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> McpResult<Established> {
        let conn = Self {
            client,
            server: server.to_string(),
            url: url.to_string(),
            auth_token,
            control_timeout: timeout,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };

        let init = conn.control("initialize", Some(initialize_params())).await?;
        let info = ServerInfo::from_initialize(&init);

        tracing::debug!(
            server = %server,
            "MCP: initialized over http (protocol version: {})",
            info.protocol_version.as_deref().unwrap_or("unknown")
        );

        let ack = RpcRequest::notification("notifications/initialized");
        if let Err(e) = conn.post(&ack, Some(conn.control_timeout)).await {
            tracing::debug!(server = %server, "MCP: initialized notification not accepted: {}", e);
        }

        Ok(Established {
            connection: Arc::new(conn),
            info,
        })
    }

    fn session(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn control(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        self.request(method, params, Some(self.control_timeout)).await
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        limit: Option<Duration>,
    ) -> McpResult<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::connection(&self.server, "connection closed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self.post(&RpcRequest::call(id, method, params), limit).await?;

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(method, limit, e))?;

        let msg = if is_sse {
            parse_sse_response(&body, &id.to_string()).ok_or_else(|| {
                McpError::connection(&self.server, format!("no response to {method} in event stream"))
            })?
        } else {
            serde_json::from_str::<RpcMessage>(&body).map_err(|e| {
                McpError::connection(&self.server, format!("response is not valid JSON: {e}"))
            })?
        };

        into_result(&self.server, msg)
    }

    async fn post(&self, body: &RpcRequest, limit: Option<Duration>) -> McpResult<reqwest::Response> {
        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);

        if let Some(limit) = limit {
            req = req.timeout(limit);
        }
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(sid) = self.session() {
            req = req.header(SESSION_HEADER, sid);
        }

        let response = req
            .send()
            .await
            .map_err(|e| self.transport_error(&body.method, limit, e))?;

        if let Some(sid) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().unwrap_or_else(|p| p.into_inner()) = Some(sid.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(McpError::connection(
                &self.server,
                format!("HTTP {}: {}", status, truncate_str(&body_text, 500)),
            ));
        }

        Ok(response)
    }

    fn transport_error(&self, method: &str, limit: Option<Duration>, e: reqwest::Error) -> McpError {
        match limit {
            Some(limit) if e.is_timeout() => {
                McpError::timeout(format!("{} on '{}'", method, self.server), limit)
            }
            _ => McpError::connection(
                &self.server,
                format!("request to '{}' failed: {}", self.url, e),
            ),
        }
    }
}

#[async_trait]
impl McpConnection for HttpConnection {
    async fn list_tools(&self) -> McpResult<Vec<ToolInfo>> {
        let result = self.control("tools/list", None).await?;
        parse_tools(&self.server, &result)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolCallResult> {
        let result = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
                None,
            )
            .await?;
        Ok(ToolCallResult::from_result(&result))
    }

    async fn ping(&self) -> McpResult<()> {
        ping_outcome(self.control("ping", None).await)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(sid) = self.session() else {
            return;
        };
        let mut req = self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, sid)
            .timeout(CLOSE_TIMEOUT);
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Err(e) = req.send().await {
            tracing::debug!(server = %self.server, "MCP: session delete failed: {}", e);
        }
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

/// Find the JSON-RPC response with the given id among SSE `data:` frames.
fn parse_sse_response(body: &str, id: &str) -> Option<RpcMessage> {
    let mut data = String::new();
    let mut frames = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            if !data.is_empty() {
                frames.push(std::mem::take(&mut data));
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        }
    }
    if !data.is_empty() {
        frames.push(data);
    }

    frames
        .iter()
        .filter_map(|frame| serde_json::from_str::<RpcMessage>(frame).ok())
        .find(|msg| msg.is_response() && msg.id_key().as_deref() == Some(id))
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let boundary = s
            .char_indices()
            .take_while(|(i, _)| *i < max_len)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(max_len);
        format!("{}...", &s[..boundary])
    }
}
