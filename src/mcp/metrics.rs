//! Tool execution metrics.
//!
//! Records are appended under a short std mutex. Totals, the average and the
//! per-tool counters are maintained incrementally over the retained history:
//! evicting a record past the retention bound subtracts it again, and a tool
//! whose last retained record is evicted disappears from the per-tool table.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::{ErrorKind, McpError};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionRecord {
    pub id: Uuid,
    /// Fully-qualified tool id as requested by the caller.
    pub tool_name: String,
    pub server_id: String,
    pub duration_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolExecutionRecord {
    pub fn new(
        tool_name: &str,
        server_id: &str,
        duration: Duration,
        error: Option<&McpError>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name: tool_name.to_string(),
            server_id: server_id.to_string(),
            duration_ms: duration.as_millis() as u64,
            success: error.is_none(),
            timestamp: Utc::now(),
            error_kind: error.map(McpError::kind),
            error_message: error.map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    /// Mean duration in milliseconds; `0` when nothing was recorded.
    pub average_execution_time: f64,
    /// Empty string when nothing was recorded.
    pub most_used_tool: String,
    pub recent_executions: Vec<ToolExecutionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub tool_name: String,
    pub server_id: String,
    pub executions: u64,
    pub failures: u64,
    pub average_execution_time: f64,
    pub last_executed: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MetricsSettings {
    /// Size of the `recentExecutions` window.
    pub recent_window: usize,
    /// Maximum number of records kept in history.
    pub retention: usize,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            recent_window: 10,
            retention: 10_000,
        }
    }
}

struct ToolAggregate {
    server_id: String,
    executions: u64,
    failures: u64,
    total_duration_ms: u64,
    first_seen: u64,
    last_executed: DateTime<Utc>,
}

#[derive(Default)]
struct MetricsInner {
    history: VecDeque<ToolExecutionRecord>,
    sequence: u64,
    total: u64,
    successful: u64,
    failed: u64,
    total_duration_ms: u64,
    per_tool: HashMap<String, ToolAggregate>,
}

impl MetricsInner {
    fn add(&mut self, record: &ToolExecutionRecord) {
        self.total += 1;
        if record.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.total_duration_ms += record.duration_ms;

        if record.server_id.is_empty() {
            return;
        }
        let order = self.sequence;
        let agg = self
            .per_tool
            .entry(record.tool_name.clone())
            .or_insert_with(|| ToolAggregate {
                server_id: record.server_id.clone(),
                executions: 0,
                failures: 0,
                total_duration_ms: 0,
                first_seen: order,
                last_executed: record.timestamp,
            });
        agg.executions += 1;
        agg.total_duration_ms += record.duration_ms;
        agg.last_executed = record.timestamp;
        if !record.success {
            agg.failures += 1;
        }
    }

    fn subtract(&mut self, record: &ToolExecutionRecord) {
        self.total -= 1;
        if record.success {
            self.successful -= 1;
        } else {
            self.failed -= 1;
        }
        self.total_duration_ms -= record.duration_ms;

        let Some(agg) = self.per_tool.get_mut(&record.tool_name) else {
            return;
        };
        agg.executions -= 1;
        agg.total_duration_ms -= record.duration_ms;
        if !record.success {
            agg.failures -= 1;
        }
        if agg.executions == 0 {
            self.per_tool.remove(&record.tool_name);
        }
    }

    fn most_used(&self) -> Option<&str> {
        self.per_tool
            .iter()
            .max_by(|(_, a), (_, b)| {
                a.executions
                    .cmp(&b.executions)
                    .then(b.first_seen.cmp(&a.first_seen))
            })
            .map(|(name, _)| name.as_str())
    }
}

pub struct MetricsCollector {
    inner: Mutex<MetricsInner>,
    settings: MetricsSettings,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsSettings::default())
    }
}

impl MetricsCollector {
    pub fn new(settings: MetricsSettings) -> Self {
        Self {
            inner: Mutex::new(MetricsInner::default()),
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append one record. Records without a resolved server (`server_id`
    /// empty) count toward the totals but get no per-tool row.
    pub fn record(&self, record: ToolExecutionRecord) {
        let mut inner = self.lock();
        inner.sequence += 1;
        inner.add(&record);
        inner.history.push_back(record);

        while inner.history.len() > self.settings.retention {
            if let Some(evicted) = inner.history.pop_front() {
                inner.subtract(&evicted);
            }
        }
    }

    pub fn get_stats(&self) -> MetricsSnapshot {
        let inner = self.lock();
        let average_execution_time = if inner.total == 0 {
            0.0
        } else {
            inner.total_duration_ms as f64 / inner.total as f64
        };
        let skip = inner.history.len().saturating_sub(self.settings.recent_window);

        MetricsSnapshot {
            total_executions: inner.total,
            successful_executions: inner.successful,
            failed_executions: inner.failed,
            average_execution_time,
            most_used_tool: inner.most_used().unwrap_or_default().to_string(),
            recent_executions: inner.history.iter().skip(skip).cloned().collect(),
        }
    }

    /// Per-tool counters, most executed first.
    pub fn tool_stats(&self) -> Vec<ToolStats> {
        let inner = self.lock();
        let mut rows: Vec<(u64, ToolStats)> = inner
            .per_tool
            .iter()
            .map(|(name, agg)| {
                (
                    agg.first_seen,
                    ToolStats {
                        tool_name: name.clone(),
                        server_id: agg.server_id.clone(),
                        executions: agg.executions,
                        failures: agg.failures,
                        average_execution_time: agg.total_duration_ms as f64
                            / agg.executions as f64,
                        last_executed: agg.last_executed,
                    },
                )
            })
            .collect();
        rows.sort_by(|(a_seen, a), (b_seen, b)| {
            b.executions.cmp(&a.executions).then(a_seen.cmp(b_seen))
        });
        rows.into_iter().map(|(_, stats)| stats).collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }
}
