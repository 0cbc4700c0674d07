//! Server registry: parses, validates and holds the configured MCP servers.
//!
//! A registry is an immutable snapshot. Reconfiguration builds a new one and
//! swaps it in wholesale, so a failed load never disturbs the running set.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{McpError, McpResult};

/// Separator between server key and tool name in a fully-qualified tool id.
pub const TOOL_ID_SEPARATOR: char = '_';

fn default_true() -> bool {
    true
}

/// How to reach a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ServerTransport {
    /// Child process speaking newline-delimited JSON-RPC on stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Remote endpoint speaking JSON-RPC over HTTP POST.
    Http {
        url: String,
        #[serde(default)]
        auth_token: Option<String>,
    },
}

impl ServerTransport {
    pub fn name(&self) -> &'static str {
        match self {
            ServerTransport::Stdio { .. } => "stdio",
            ServerTransport::Http { .. } => "http",
        }
    }
}

/// Capabilities the operator declares for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default = "default_true")]
    pub tools: bool,
    #[serde(default)]
    pub resources: bool,
    #[serde(default)]
    pub prompts: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: true,
            resources: false,
            prompts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub transport: ServerTransport,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-server override of the tool call timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ServerConfig {
    pub fn stdio(key: &str, command: &str, args: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            label: key.to_string(),
            transport: ServerTransport::Stdio {
                command: command.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                env: BTreeMap::new(),
            },
            capabilities: ServerCapabilities::default(),
            enabled: true,
            timeout_secs: None,
        }
    }

    pub fn http(key: &str, url: &str) -> Self {
        Self {
            key: key.to_string(),
            label: key.to_string(),
            transport: ServerTransport::Http {
                url: url.to_string(),
                auth_token: None,
            },
            capabilities: ServerCapabilities::default(),
            enabled: true,
            timeout_secs: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }
}

/// Where the registry reads its server list from.
#[derive(Debug, Clone)]
pub enum ServerSource {
    File(PathBuf),
    Inline(Vec<ServerConfig>),
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    servers: Arc<BTreeMap<String, Arc<ServerConfig>>>,
}

impl ServerRegistry {
    pub async fn load(source: &ServerSource) -> McpResult<Self> {
        match source {
            ServerSource::Inline(configs) => Self::from_configs(configs.clone()),
            ServerSource::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    McpError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_json(&raw)
            }
        }
    }

    pub fn from_json(raw: &str) -> McpResult<Self> {
        let file: ServersFile = serde_json::from_str(raw)
            .map_err(|e| McpError::Config(format!("malformed server config: {e}")))?;
        Self::from_configs(file.servers)
    }

    /// Validate every definition and keep the enabled ones.
    pub fn from_configs(configs: Vec<ServerConfig>) -> McpResult<Self> {
        let mut seen = HashSet::new();
        let mut servers = BTreeMap::new();

        for mut cfg in configs {
            validate_key(&cfg.key)?;
            if !seen.insert(cfg.key.clone()) {
                return Err(McpError::Config(format!("duplicate server key '{}'", cfg.key)));
            }
            validate_transport(&cfg)?;
            if cfg.label.trim().is_empty() {
                cfg.label = cfg.key.clone();
            }
            if !cfg.enabled {
                tracing::debug!("MCP: server '{}' disabled, skipping", cfg.key);
                continue;
            }
            servers.insert(cfg.key.clone(), Arc::new(cfg));
        }

        Ok(Self {
            servers: Arc::new(servers),
        })
    }

    pub fn get(&self, key: &str) -> Option<Arc<ServerConfig>> {
        self.servers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.servers.contains_key(key)
    }

    /// Enabled servers ordered by key.
    pub fn configs(&self) -> Vec<Arc<ServerConfig>> {
        self.servers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

fn validate_key(key: &str) -> McpResult<()> {
    if key.is_empty() {
        return Err(McpError::Config("server key must not be empty".into()));
    }
    if key.contains(TOOL_ID_SEPARATOR) {
        return Err(McpError::Config(format!(
            "server key '{key}' must not contain '{TOOL_ID_SEPARATOR}'"
        )));
    }
    if let Some(bad) = key.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
        return Err(McpError::Config(format!(
            "server key '{key}' contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

fn validate_transport(cfg: &ServerConfig) -> McpResult<()> {
    match &cfg.transport {
        ServerTransport::Stdio { command, .. } => {
            if command.trim().is_empty() {
                return Err(McpError::Config(format!(
                    "server '{}': stdio transport requires a command",
                    cfg.key
                )));
            }
        }
        ServerTransport::Http { url, .. } => {
            let parsed = url::Url::parse(url).map_err(|e| {
                McpError::Config(format!("server '{}': invalid url '{}': {}", cfg.key, url, e))
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(McpError::Config(format!(
                    "server '{}': unsupported url scheme '{}'",
                    cfg.key,
                    parsed.scheme()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_transports() {
        let registry = ServerRegistry::from_json(
            r#"{
                "servers": [
                    {"key": "fs", "label": "Filesystem", "transport": "stdio",
                     "command": "npx", "args": ["-y", "server-filesystem"]},
                    {"key": "search", "transport": "http",
                     "url": "https://search.example.com/mcp", "authToken": "t0k"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        let fs = registry.get("fs").unwrap();
        assert_eq!(fs.label, "Filesystem");
        assert_eq!(fs.transport.name(), "stdio");
        assert!(fs.capabilities.tools);

        let search = registry.get("search").unwrap();
        assert_eq!(search.label, "search");
        match &search.transport {
            ServerTransport::Http { auth_token, .. } => {
                assert_eq!(auth_token.as_deref(), Some("t0k"))
            }
            other => panic!("unexpected transport {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = ServerRegistry::from_configs(vec![
            ServerConfig::stdio("fs", "a", &[]),
            ServerConfig::stdio("fs", "b", &[]),
        ])
        .unwrap_err();
        assert!(matches!(err, McpError::Config(m) if m.contains("duplicate")));
    }

    #[test]
    fn rejects_separator_in_key() {
        let err = ServerRegistry::from_configs(vec![ServerConfig::stdio("my_fs", "a", &[])])
            .unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
    }

    #[test]
    fn rejects_malformed_descriptors() {
        assert!(ServerRegistry::from_configs(vec![ServerConfig::stdio("fs", "  ", &[])]).is_err());
        assert!(ServerRegistry::from_configs(vec![ServerConfig::http("web", "not a url")]).is_err());
        assert!(
            ServerRegistry::from_configs(vec![ServerConfig::http("web", "ftp://host/mcp")]).is_err()
        );
        assert!(ServerRegistry::from_json(r#"{"servers": [{"key": "x"}]}"#).is_err());
    }

    #[test]
    fn disabled_servers_are_skipped() {
        let mut off = ServerConfig::stdio("off", "cmd", &[]);
        off.enabled = false;
        let registry =
            ServerRegistry::from_configs(vec![off, ServerConfig::stdio("on", "cmd", &[])]).unwrap();
        assert!(!registry.contains("off"));
        assert!(registry.contains("on"));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(
            &path,
            r#"{"servers": [{"key": "git", "transport": "stdio", "command": "git-mcp"}]}"#,
        )
        .unwrap();

        let registry = ServerRegistry::load(&ServerSource::File(path)).await.unwrap();
        assert_eq!(registry.configs().len(), 1);

        let missing = ServerRegistry::load(&ServerSource::File(dir.path().join("nope.json"))).await;
        assert!(matches!(missing, Err(McpError::Config(_))));
    }
}
