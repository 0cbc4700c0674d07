//! Tool execution router.
//!
//! Resolves a fully-qualified tool id to its owning server, performs exactly
//! one outbound call through the pool and records exactly one metrics entry
//! per attempt, whatever the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::catalog::split_tool_id;
use super::connection::ToolCallResult;
use super::error::{ErrorKind, McpError, McpResult};
use super::metrics::{MetricsCollector, ToolExecutionRecord};
use super::pool::{ConnectionGuard, ConnectionPool};

#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Default bound on `tools/call`; a server's `timeoutSecs` overrides it.
    pub call_timeout: Duration,
    /// Bound on the ping that re-verifies a connection after a timeout.
    pub probe_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

pub struct ToolRouter {
    pool: Arc<ConnectionPool>,
    metrics: Arc<MetricsCollector>,
    settings: RouterSettings,
}

impl ToolRouter {
    pub fn new(
        pool: Arc<ConnectionPool>,
        metrics: Arc<MetricsCollector>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            pool,
            metrics,
            settings,
        }
    }

    pub async fn execute(&self, full_id: &str, arguments: Value) -> McpResult<ToolCallResult> {
        let started = Instant::now();
        let server_id = match split_tool_id(full_id) {
            Some((key, _)) if self.pool.contains(key).await => key,
            _ => "",
        };

        let result = self.dispatch(full_id, arguments).await;
        let elapsed = started.elapsed();

        self.metrics.record(ToolExecutionRecord::new(
            full_id,
            server_id,
            elapsed,
            result.as_ref().err(),
        ));

        match &result {
            Ok(_) => tracing::debug!(
                server = %server_id,
                "MCP: {} completed in {}ms",
                full_id,
                elapsed.as_millis()
            ),
            Err(e) => tracing::warn!(
                server = %server_id,
                kind = ?e.kind(),
                "MCP: {} failed after {}ms: {}",
                full_id,
                elapsed.as_millis(),
                e
            ),
        }
        result
    }

    async fn dispatch(&self, full_id: &str, arguments: Value) -> McpResult<ToolCallResult> {
        let Some((key, tool)) = split_tool_id(full_id) else {
            return Err(McpError::ToolUnavailable {
                tool: full_id.to_string(),
                reason: "not a fully-qualified tool id".to_string(),
            });
        };

        let guard = self
            .pool
            .acquire(key)
            .await
            .map_err(|e| McpError::ToolUnavailable {
                tool: full_id.to_string(),
                reason: e.to_string(),
            })?;

        if !guard.has_tool(tool) {
            return Err(McpError::ToolUnavailable {
                tool: full_id.to_string(),
                reason: format!("server '{key}' does not provide '{tool}'"),
            });
        }

        let timeout = guard.call_timeout().unwrap_or(self.settings.call_timeout);
        match tokio::time::timeout(timeout, guard.connection().call_tool(tool, arguments)).await {
            Ok(Ok(result)) if result.is_error => Err(McpError::Execution {
                server: key.to_string(),
                message: result.text,
                code: None,
            }),
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) if e.kind() == ErrorKind::Timeout => {
                self.reverify(&guard).await;
                Err(e)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.reverify(&guard).await;
                Err(McpError::timeout(format!("tools/call '{full_id}'"), timeout))
            }
        }
    }

    /// After a timed-out call, keep the connection only if it still answers.
    async fn reverify(&self, guard: &ConnectionGuard) {
        let ping = tokio::time::timeout(self.settings.probe_timeout, guard.connection().ping()).await;
        if !matches!(ping, Ok(Ok(()))) {
            self.pool
                .invalidate(
                    guard.key(),
                    guard.generation(),
                    "unresponsive after a timed-out tool call",
                )
                .await;
        }
    }
}
