//! Error taxonomy for the MCP manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::pool::ServerStatus;

/// Coarse classification attached to execution records and API errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Config,
    Connection,
    ToolUnavailable,
    Execution,
    Timeout,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    /// Invalid or duplicate server definitions, or a tool id collision.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure talking to a server.
    #[error("connection to '{server}' failed: {message}")]
    Connection { server: String, message: String },

    #[error("server '{0}' is not configured")]
    ServerNotFound(String),

    #[error("server '{key}' is not ready (status: {status})")]
    ServerNotReady { key: String, status: ServerStatus },

    /// The addressed tool cannot be routed right now.
    #[error("tool '{tool}' unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    /// The call reached the server and the server reported failure.
    #[error("tool execution failed on '{server}': {message}")]
    Execution {
        server: String,
        message: String,
        code: Option<i64>,
    },

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },
}

impl McpError {
    pub fn connection(server: &str, message: impl Into<String>) -> Self {
        McpError::Connection {
            server: server.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        McpError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::Config(_) => ErrorKind::Config,
            McpError::Connection { .. } => ErrorKind::Connection,
            McpError::ServerNotFound(_)
            | McpError::ServerNotReady { .. }
            | McpError::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            McpError::Execution { .. } => ErrorKind::Execution,
            McpError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_classify_as_unavailable() {
        assert_eq!(
            McpError::ServerNotFound("fs".into()).kind(),
            ErrorKind::ToolUnavailable
        );
        assert_eq!(
            McpError::ServerNotReady {
                key: "fs".into(),
                status: ServerStatus::Degraded
            }
            .kind(),
            ErrorKind::ToolUnavailable
        );
    }

    #[test]
    fn timeout_message_includes_duration() {
        let err = McpError::timeout("tools/call", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "tools/call timed out after 1500ms");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
