// Application state

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use utoipa::ToSchema;

use crate::mcp::McpManager;

// ── Log Ring Buffer ─────────────────────────────────────────────────────────
/// In-memory ring buffer for backend log entries (last N events).
/// Uses `std::sync::Mutex` because writes happen in the tracing Layer
/// (sync context, not inside a tokio runtime poll).

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

pub struct LogRingBuffer {
    entries: std::sync::Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: std::sync::Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut buf = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry);
    }

    /// Newest first, optionally filtered by minimum level and a substring.
    pub fn recent(&self, limit: usize, min_level: Option<&str>, search: Option<&str>) -> Vec<LogEntry> {
        let buf = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let needle = search.map(str::to_lowercase);
        buf.iter()
            .rev()
            .filter(|e| min_level.is_none_or(|lvl| level_ord(&e.level) >= level_ord(lvl)))
            .filter(|e| {
                needle.as_deref().is_none_or(|s| {
                    e.message.to_lowercase().contains(s) || e.target.to_lowercase().contains(s)
                })
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn clear(&self) -> usize {
        let mut buf = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let n = buf.len();
        buf.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn level_ord(level: &str) -> u8 {
    match level.to_uppercase().as_str() {
        "ERROR" => 5,
        "WARN" => 4,
        "INFO" => 3,
        "DEBUG" => 2,
        "TRACE" => 1,
        _ => 0,
    }
}

// ── AppState ────────────────────────────────────────────────────────────────
/// Central application state. Clone-friendly, every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<McpManager>,
    pub start_time: Instant,
    /// Optional auth secret from AUTH_SECRET env. None = dev mode (no auth).
    pub auth_secret: Option<Arc<str>>,
    pub log_buffer: Arc<LogRingBuffer>,
}

impl AppState {
    pub fn new(
        manager: Arc<McpManager>,
        auth_secret: Option<String>,
        log_buffer: Arc<LogRingBuffer>,
    ) -> Self {
        Self {
            manager,
            start_time: Instant::now(),
            auth_secret: auth_secret.map(Arc::from),
            log_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: "2026-01-01T00:00:00Z".into(),
            level: level.into(),
            target: "mcphub_backend::mcp::pool".into(),
            message: message.into(),
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let buf = LogRingBuffer::new(2);
        buf.push(entry("INFO", "one"));
        buf.push(entry("INFO", "two"));
        buf.push(entry("INFO", "three"));

        let recent = buf.recent(10, None, None);
        let messages: Vec<&str> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["three", "two"]);
    }

    #[test]
    fn ring_buffer_filters_by_level_and_search() {
        let buf = LogRingBuffer::new(10);
        buf.push(entry("DEBUG", "probe ok"));
        buf.push(entry("WARN", "fs degraded"));
        buf.push(entry("ERROR", "git connect failed"));

        assert_eq!(buf.recent(10, Some("warn"), None).len(), 2);
        assert_eq!(buf.recent(10, None, Some("GIT")).len(), 1);
        assert_eq!(buf.recent(1, None, None)[0].message, "git connect failed");
        assert_eq!(buf.clear(), 3);
        assert!(buf.is_empty());
    }
}
