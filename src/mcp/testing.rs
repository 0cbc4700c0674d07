// In-memory MCP servers for unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::connection::{
    Connector, Established, McpConnection, ServerInfo, ToolCallResult, ToolInfo,
};
use super::error::{McpError, McpResult};
use super::registry::ServerConfig;

pub struct FakeServer {
    key: String,
    tools: Mutex<Vec<ToolInfo>>,
    healthy: AtomicBool,
    refuse_connect: AtomicBool,
    call_delay: Mutex<Duration>,
    call_timeouts: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    calls: AtomicUsize,
    pings: AtomicUsize,
    live: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeServer {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *lock(&self.call_delay) = delay;
    }

    /// Make `tools/call` fail the way a transport-level timeout does.
    pub fn time_out_calls(&self, enabled: bool) {
        self.call_timeouts.store(enabled, Ordering::SeqCst);
    }

    pub fn set_tools(&self, names: &[&str]) {
        *lock(&self.tools) = tools(names);
    }

    /// Simulate the transport dying underneath every open connection.
    pub fn kill_connections(&self) {
        for flag in lock(&self.live).iter() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

/// A POSIX `sh` MCP server for transport tests. It answers `initialize`,
/// `ping` and `tools/list` (one tool, `wait`) immediately and sleeps
/// `$CALL_SECS` seconds (default 1) before answering `tools/call`. Requests
/// are handled one at a time.
pub const SLOW_STDIO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -n "$id" ] || continue
  case "$line" in
    *'"tools/call"'*)
      sleep "${CALL_SECS:-1}"
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"done"}]}}\n' "$id" ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"wait","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

pub fn tools(names: &[&str]) -> Vec<ToolInfo> {
    names
        .iter()
        .map(|n| ToolInfo {
            name: n.to_string(),
            description: Some(format!("{n} tool")),
            input_schema: json!({"type": "object", "properties": {}}),
        })
        .collect()
}

#[derive(Default)]
pub struct FakeConnector {
    servers: Mutex<HashMap<String, Arc<FakeServer>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, key: &str, tool_names: &[&str]) -> Arc<FakeServer> {
        let server = Arc::new(FakeServer {
            key: key.to_string(),
            tools: Mutex::new(tools(tool_names)),
            healthy: AtomicBool::new(true),
            refuse_connect: AtomicBool::new(false),
            call_delay: Mutex::new(Duration::ZERO),
            call_timeouts: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            live: Mutex::new(Vec::new()),
        });
        lock(&self.servers).insert(key.to_string(), server.clone());
        server
    }

    pub fn server(&self, key: &str) -> Arc<FakeServer> {
        lock(&self.servers)[key].clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &ServerConfig, _timeout: Duration) -> McpResult<Established> {
        let server = lock(&self.servers).get(&config.key).cloned();
        let Some(server) = server else {
            return Err(McpError::connection(&config.key, "connection refused"));
        };
        if server.refuse_connect.load(Ordering::SeqCst) {
            return Err(McpError::connection(&config.key, "connection refused"));
        }
        server.connects.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        lock(&server.live).push(alive.clone());
        Ok(Established {
            connection: Arc::new(FakeConnection {
                server,
                alive,
                closed: AtomicBool::new(false),
            }),
            info: ServerInfo {
                name: Some(config.key.clone()),
                version: Some("1.0.0".into()),
                protocol_version: Some("2024-11-05".into()),
            },
        })
    }
}

struct FakeConnection {
    server: Arc<FakeServer>,
    alive: Arc<AtomicBool>,
    closed: AtomicBool,
}

#[async_trait]
impl McpConnection for FakeConnection {
    async fn list_tools(&self) -> McpResult<Vec<ToolInfo>> {
        if !self.server.healthy.load(Ordering::SeqCst) {
            return Err(McpError::connection(&self.server.key, "unreachable"));
        }
        Ok(lock(&self.server.tools).clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolCallResult> {
        self.server.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.server.call_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.server.call_timeouts.load(Ordering::SeqCst) {
            return Err(McpError::timeout(
                format!("tools/call on '{}'", self.server.key),
                Duration::from_secs(1),
            ));
        }
        if !self.server.healthy.load(Ordering::SeqCst) {
            return Err(McpError::connection(&self.server.key, "connection reset"));
        }
        Ok(ToolCallResult {
            text: format!("{name}:{arguments}"),
            content: json!([{"type": "text", "text": format!("{name}:{arguments}")}]),
            is_error: name == "fail",
        })
    }

    async fn ping(&self) -> McpResult<()> {
        self.server.pings.fetch_add(1, Ordering::SeqCst);
        if self.server.healthy.load(Ordering::SeqCst) && self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpError::connection(&self.server.key, "ping failed"))
        }
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.server.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
