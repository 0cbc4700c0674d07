// ---------------------------------------------------------------------------
// handlers/ -- HTTP handlers grouped by area
// mod.rs re-exports the handlers and holds the shared API error type.
// ---------------------------------------------------------------------------

// Sub-modules are pub(crate) so utoipa __path_* types are accessible from lib.rs OpenApi derive.
pub(crate) mod mcp;
pub(crate) mod system;
#[cfg(test)]
mod tests;

// ── Re-exports ───────────────────────────────────────────────────────────────

pub use mcp::{
    execute_tool, mcp_health, mcp_metrics, mcp_pool, mcp_status, mcp_tool_stats, mcp_tools,
    reload_servers,
};
pub use system::{health, readiness};

// ── utoipa __path_* re-exports ───────────────────────────────────────────────
// The #[utoipa::path] attribute macro generates structs like __path_health.
// The OpenApi derive in lib.rs expects them at `handlers::__path_health`.
pub use mcp::{
    __path_execute_tool, __path_mcp_health, __path_mcp_metrics, __path_mcp_pool,
    __path_mcp_status, __path_mcp_tool_stats, __path_mcp_tools, __path_reload_servers,
};
pub use system::{__path_health, __path_readiness};

// ── Shared types ─────────────────────────────────────────────────────────────

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::mcp::McpError;

/// Centralized API error type for all handlers.
/// Logs full details server-side, returns sanitized JSON to the client.
///
/// Response format (structured):
/// ```json
/// {
///   "error": {
///     "code": "TOOL_UNAVAILABLE",
///     "message": "Human-readable description",
///     "request_id": "uuid",
///     "details": { ... }       // optional, null when absent
///   }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Tool execution failed: {0}")]
    ToolFailed(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),
}

/// Structured error response body, serialized inside `{ "error": ... }`.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct StructuredApiError {
    /// Machine-readable error code (e.g. "BAD_REQUEST", "TOOL_TIMEOUT").
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

impl ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Config(_) => "CONFIG_ERROR",
            ApiError::ToolUnavailable(_) => "TOOL_UNAVAILABLE",
            ApiError::ToolFailed(_) => "TOOL_EXECUTION_ERROR",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::ToolTimeout(_) => "TOOL_TIMEOUT",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ToolUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ToolFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::ToolTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Sanitized message safe to return to clients.
    /// Transport failures get a generic message; the rest pass through.
    fn sanitized_message(&self) -> String {
        match self {
            ApiError::Upstream(_) => "Upstream MCP server error".to_string(),
            ApiError::BadRequest(m)
            | ApiError::Config(m)
            | ApiError::ToolUnavailable(m)
            | ApiError::ToolFailed(m)
            | ApiError::ToolTimeout(m) => m.clone(),
        }
    }

    pub fn with_details(self, details: Value) -> ApiErrorWithDetails {
        ApiErrorWithDetails {
            error: self,
            details: Some(details),
        }
    }

    fn current_request_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn respond(&self, details: Option<Value>) -> axum::response::Response {
        use axum::response::IntoResponse;

        let status = self.status_code();
        let request_id = Self::current_request_id();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                code = self.error_code(),
                "API error ({}): {}",
                status.as_u16(),
                self
            );
        } else {
            tracing::warn!(
                request_id = %request_id,
                code = self.error_code(),
                "API error ({}): {}",
                status.as_u16(),
                self
            );
        }

        let body = json!({
            "error": {
                "code": self.error_code(),
                "message": self.sanitized_message(),
                "request_id": request_id,
                "details": details,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        self.respond(None)
    }
}

impl From<McpError> for ApiError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Config(m) => ApiError::Config(m),
            McpError::Connection { .. } => ApiError::Upstream(e.to_string()),
            McpError::ServerNotFound(_)
            | McpError::ServerNotReady { .. }
            | McpError::ToolUnavailable { .. } => ApiError::ToolUnavailable(e.to_string()),
            McpError::Execution { .. } => ApiError::ToolFailed(e.to_string()),
            McpError::Timeout { .. } => ApiError::ToolTimeout(e.to_string()),
        }
    }
}

/// ApiError with optional structured details attached.
/// Use `ApiError::BadRequest("msg".into()).with_details(json!({...}))` to construct.
pub struct ApiErrorWithDetails {
    pub error: ApiError,
    pub details: Option<Value>,
}

impl axum::response::IntoResponse for ApiErrorWithDetails {
    fn into_response(self) -> axum::response::Response {
        self.error.respond(self.details)
    }
}

impl From<ApiError> for ApiErrorWithDetails {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            details: None,
        }
    }
}
