//! MCP client over a child process's stdin/stdout.
//!
//! Messages are newline-delimited JSON. A reader task routes responses to the
//! waiting caller by request id; stderr is forwarded to tracing.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;

use super::connection::{
    into_result, parse_tools, ping_outcome, Established, McpConnection, ServerInfo,
    ToolCallResult, ToolInfo,
};
use super::error::{McpError, McpResult};
use super::jsonrpc::{initialize_params, method_not_found, RpcMessage, RpcRequest};

const KILL_TIMEOUT: Duration = Duration::from_secs(2);

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<RpcMessage>>>>;
type SharedStdin = Arc<tokio::sync::Mutex<ChildStdin>>;

pub struct StdioConnection {
    server: String,
    stdin: SharedStdin,
    child: tokio::sync::Mutex<Option<Child>>,
    pending: Pending,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    /// Bound on handshake, `tools/list` and `ping`. `tools/call` is bounded
    /// by the caller.
    control_timeout: Duration,
}

/// Drops the pending slot when a request finishes or is cancelled.
struct PendingGuard {
    pending: Pending,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.key);
    }
}

impl StdioConnection {
    pub async fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> McpResult<Established> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::connection(server, format!("spawning '{command}': {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connection(server, "no stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::connection(server, "no stderr"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connection(server, "no stdin"))?;

        let conn = Self {
            server: server.to_string(),
            stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
            child: tokio::sync::Mutex::new(Some(child)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            alive: Arc::new(AtomicBool::new(true)),
            control_timeout: timeout,
        };
        conn.start_reader(stdout);
        forward_stderr(server.to_string(), stderr);

        let init = match conn.control("initialize", Some(initialize_params())).await {
            Ok(v) => v,
            Err(e) => {
                conn.close().await;
                return Err(e);
            }
        };
        let info = ServerInfo::from_initialize(&init);

        tracing::debug!(
            server = %server,
            "MCP: initialized over stdio (protocol version: {})",
            info.protocol_version.as_deref().unwrap_or("unknown")
        );

        let ack = serde_json::to_value(RpcRequest::notification("notifications/initialized"))
            .unwrap_or(Value::Null);
        if let Err(e) = write_line(&conn.stdin, &ack).await {
            conn.close().await;
            return Err(McpError::connection(server, e));
        }

        Ok(Established {
            connection: Arc::new(conn),
            info,
        })
    }

    fn start_reader(&self, stdout: ChildStdout) {
        let pending = self.pending.clone();
        let alive = self.alive.clone();
        let stdin = self.stdin.clone();
        let server = self.server.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(msg) = serde_json::from_str::<RpcMessage>(&line) else {
                    tracing::debug!(server = %server, line = %line, "MCP: non-JSON stdout");
                    continue;
                };

                if msg.is_response() {
                    let waiter = msg.id_key().and_then(|key| {
                        pending.lock().unwrap_or_else(|p| p.into_inner()).remove(&key)
                    });
                    if let Some(tx) = waiter {
                        let _ = tx.send(msg);
                    }
                    continue;
                }

                match (msg.id, msg.method) {
                    (Some(id), Some(method)) => {
                        tracing::debug!(server = %server, "MCP: rejecting server request '{}'", method);
                        let _ = write_line(&stdin, &method_not_found(id, &method)).await;
                    }
                    (None, Some(method)) => {
                        tracing::trace!(server = %server, "MCP: notification '{}'", method);
                    }
                    _ => {}
                }
            }

            alive.store(false, Ordering::Release);
            // Dropping the senders wakes every waiter with a closed-channel error.
            pending.lock().unwrap_or_else(|p| p.into_inner()).clear();
            tracing::info!(server = %server, "MCP: stdio server closed its output");
        });
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
        if !self.is_alive() {
            return Err(McpError::connection(&self.server, "process exited"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = id.to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.clone(), tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            key,
        };
        // The reader may have drained `pending` between the check above and the insert.
        if !self.is_alive() {
            return Err(McpError::connection(&self.server, "process exited"));
        }

        let req = serde_json::to_value(RpcRequest::call(id, method, params))
            .map_err(|e| McpError::connection(&self.server, e.to_string()))?;
        write_line(&self.stdin, &req)
            .await
            .map_err(|e| McpError::connection(&self.server, e))?;

        let reply = match limit {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
                McpError::timeout(format!("{} on '{}'", method, self.server), limit)
            })?,
            None => rx.await,
        };
        match reply {
            Ok(msg) => into_result(&self.server, msg),
            Err(_) => Err(McpError::connection(
                &self.server,
                format!("process exited during {method}"),
            )),
        }
    }
}

#[async_trait]
impl McpConnection for StdioConnection {
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
        self.alive.store(false, Ordering::Release);
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                tracing::debug!(server = %self.server, "MCP: kill failed: {}", e);
            }
            if tokio::time::timeout(KILL_TIMEOUT, child.wait()).await.is_err() {
                tracing::warn!(server = %self.server, "MCP: process did not exit after kill");
            }
        }
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

async fn write_line(stdin: &SharedStdin, value: &Value) -> Result<(), String> {
    let mut line = value.to_string();
    line.push('\n');
    let mut stdin = stdin.lock().await;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| format!("writing to stdin: {e}"))?;
    stdin.flush().await.map_err(|e| format!("flushing stdin: {e}"))
}

fn forward_stderr(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, "MCP stderr: {}", line);
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mcp::testing::SLOW_STDIO_SERVER;

    #[tokio::test]
    async fn tool_call_outlives_control_timeout() {
        let env = BTreeMap::from([("CALL_SECS".to_string(), "1".to_string())]);
        let established = StdioConnection::spawn(
            "slow",
            "sh",
            &["-c".to_string(), SLOW_STDIO_SERVER.to_string()],
            &env,
            Duration::from_millis(300),
        )
        .await
        .unwrap();
        let conn = established.connection;

        let tools = conn.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "wait");

        let result = conn.call_tool("wait", json!({})).await.unwrap();
        assert_eq!(result.text, "done");
        conn.ping().await.unwrap();
        conn.close().await;
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn control_requests_stay_bounded() {
        let env = BTreeMap::from([("CALL_SECS".to_string(), "2".to_string())]);
        let established = StdioConnection::spawn(
            "slow",
            "sh",
            &["-c".to_string(), SLOW_STDIO_SERVER.to_string()],
            &env,
            Duration::from_millis(300),
        )
        .await
        .unwrap();
        let conn = established.connection;

        // The server is busy with the call, so the ping cannot be answered in time.
        let call = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.call_tool("wait", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let err = conn.ping().await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));

        conn.close().await;
        let _ = call.await;
    }

    #[tokio::test]
    async fn spawn_failure_is_connection_error() {
        let result = StdioConnection::spawn(
            "ghost",
            "/definitely/not/a/binary",
            &[],
            &BTreeMap::new(),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(McpError::Connection { .. })));
    }

    #[tokio::test]
    async fn exiting_process_fails_handshake() {
        // `true` exits immediately without answering initialize.
        let result = StdioConnection::spawn(
            "quitter",
            "true",
            &[],
            &BTreeMap::new(),
            Duration::from_secs(2),
        )
        .await;
        assert!(matches!(result, Err(McpError::Connection { .. })));
    }

    #[tokio::test]
    async fn silent_process_times_out() {
        let result = StdioConnection::spawn(
            "sleeper",
            "sleep",
            &["5".to_string()],
            &BTreeMap::new(),
            Duration::from_millis(200),
        )
        .await;
        assert!(matches!(result, Err(McpError::Timeout { .. })));
    }
}
