//! Combined tool catalog across all ready servers.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use super::error::{McpError, McpResult};
use super::pool::{ManagedServerEntry, ServerStatus};
use super::registry::TOOL_ID_SEPARATOR;

/// A tool as exposed to callers, namespaced by its server key.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub input_schema: Value,
    pub server_id: String,
    pub server_label: String,
    /// `{serverId}_{name}`; the identifier accepted by tool execution.
    pub full_id: String,
}

pub fn tool_id(server_key: &str, tool_name: &str) -> String {
    format!("{server_key}{TOOL_ID_SEPARATOR}{tool_name}")
}

/// Split a full tool id at the first separator. Server keys never contain
/// the separator, so the remainder is the tool name verbatim.
pub fn split_tool_id(full_id: &str) -> Option<(&str, &str)> {
    let (server, tool) = full_id.split_once(TOOL_ID_SEPARATOR)?;
    if server.is_empty() || tool.is_empty() {
        return None;
    }
    Some((server, tool))
}

/// Flatten the tools of every `ready` entry. Entries in any other status
/// contribute nothing. Two tools resolving to the same full id is a
/// configuration error.
pub fn combined_tools(entries: &[ManagedServerEntry]) -> McpResult<Vec<ToolDescriptor>> {
    let mut out = Vec::new();
    let mut seen: HashMap<String, &str> = HashMap::new();

    for entry in entries.iter().filter(|e| e.status == ServerStatus::Ready) {
        for tool in &entry.tools {
            let full_id = tool_id(&entry.key, &tool.name);
            if let Some(owner) = seen.insert(full_id.clone(), entry.key.as_str()) {
                return Err(McpError::Config(format!(
                    "tool id '{}' is provided more than once (servers '{}' and '{}')",
                    full_id, owner, entry.key
                )));
            }
            out.push(ToolDescriptor {
                name: tool.name.clone(),
                description: tool.description.clone().unwrap_or_default(),
                input_schema: tool.input_schema.clone(),
                server_id: entry.key.clone(),
                server_label: entry.label.clone(),
                full_id,
            });
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::testing::tools;

    fn entry(key: &str, status: ServerStatus, tool_names: &[&str]) -> ManagedServerEntry {
        ManagedServerEntry {
            key: key.to_string(),
            label: format!("{key} server"),
            transport: "stdio".to_string(),
            status,
            last_checked: None,
            last_error: None,
            tools: tools(tool_names),
            server_name: None,
            version: None,
            protocol_version: None,
            generation: 1,
            consecutive_failures: 0,
            connected: status == ServerStatus::Ready,
            in_flight: 0,
        }
    }

    #[test]
    fn only_ready_servers_contribute() {
        let entries = vec![
            entry("fs", ServerStatus::Ready, &["read", "write"]),
            entry("search", ServerStatus::Error, &["query"]),
            entry("git", ServerStatus::Ready, &["log"]),
        ];
        let catalog = combined_tools(&entries).unwrap();
        let ids: Vec<&str> = catalog.iter().map(|t| t.full_id.as_str()).collect();
        assert_eq!(ids, vec!["fs_read", "fs_write", "git_log"]);
        assert_eq!(catalog[0].server_label, "fs server");
        assert_eq!(catalog[0].description, "read tool");
    }

    #[test]
    fn degraded_and_empty_servers_are_skipped() {
        let entries = vec![
            entry("fs", ServerStatus::Degraded, &["read"]),
            entry("idle", ServerStatus::Ready, &[]),
        ];
        assert!(combined_tools(&entries).unwrap().is_empty());
        assert!(combined_tools(&[]).unwrap().is_empty());
    }

    #[test]
    fn duplicate_full_id_is_config_error() {
        let entries = vec![entry("fs", ServerStatus::Ready, &["read", "read"])];
        let err = combined_tools(&entries).unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
        assert!(err.to_string().contains("fs_read"));
    }

    #[test]
    fn splits_on_first_separator() {
        assert_eq!(split_tool_id("fs_read_file"), Some(("fs", "read_file")));
        assert_eq!(split_tool_id("git_log"), Some(("git", "log")));
        assert_eq!(split_tool_id("nounderscore"), None);
        assert_eq!(split_tool_id("_read"), None);
        assert_eq!(split_tool_id("fs_"), None);
        assert_eq!(tool_id("fs", "read_file"), "fs_read_file");
    }
}
