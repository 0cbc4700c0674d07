// Backend log endpoints and the tracing layer that feeds them.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;
use utoipa::{IntoParams, ToSchema};

use crate::state::{AppState, LogEntry, LogRingBuffer};

// ── Tracing layer ───────────────────────────────────────────────────

/// Copies every event that passes the subscriber's filter into the ring buffer.
pub struct LogBufferLayer {
    buffer: Arc<LogRingBuffer>,
}

impl LogBufferLayer {
    pub fn new(buffer: Arc<LogRingBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        self.buffer.push(LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field, format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field, format_args!("{value:?}"));
        }
    }
}

impl MessageVisitor {
    fn push_field(&mut self, field: &Field, value: std::fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", field.name(), value);
    }
}

// ── Query parameters ────────────────────────────────────────────────

#[derive(Debug, Deserialize, IntoParams)]
pub struct BackendLogsQuery {
    pub limit: Option<usize>,
    /// Minimum level (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackendLogsResponse {
    pub logs: Vec<LogEntry>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClearLogsResponse {
    pub cleared: usize,
}

// ── GET /api/logs/backend ───────────────────────────────────────────

#[utoipa::path(get, path = "/api/logs/backend", tag = "logs",
    params(BackendLogsQuery),
    responses((status = 200, description = "Recent backend log entries, newest first", body = BackendLogsResponse))
)]
pub async fn backend_logs(
    State(state): State<AppState>,
    Query(q): Query<BackendLogsQuery>,
) -> Json<BackendLogsResponse> {
    let limit = q.limit.unwrap_or(200).min(500);
    let logs = state
        .log_buffer
        .recent(limit, q.level.as_deref(), q.search.as_deref());
    let total = logs.len();
    Json(BackendLogsResponse { logs, total })
}

// ── DELETE /api/logs/backend ────────────────────────────────────────

#[utoipa::path(delete, path = "/api/logs/backend", tag = "logs",
    responses((status = 200, description = "Log buffer cleared", body = ClearLogsResponse))
)]
pub async fn clear_backend_logs(State(state): State<AppState>) -> Json<ClearLogsResponse> {
    Json(ClearLogsResponse {
        cleared: state.log_buffer.clear(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn layer_captures_message_and_fields() {
        let buffer = Arc::new(LogRingBuffer::new(10));
        let subscriber =
            tracing_subscriber::registry().with(LogBufferLayer::new(buffer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(server = "fs", "MCP: ready -> degraded");
        });

        let logs = buffer.recent(10, None, None);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, "WARN");
        assert_eq!(logs[0].message, "MCP: ready -> degraded server=fs");
    }
}
