//! System server configuration
//!
//! Static configuration for system-wide MCP servers, read once from
//! `mcp_servers.json` in the working directory at startup. A missing or
//! unparsable file yields zero system servers; it is never fatal.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::core::PoolResult;

/// Default system config file, relative to the process working directory
pub const SYSTEM_CONFIG_FILE: &str = "mcp_servers.json";

/// Transport-specific connection settings for one server.
///
/// Tagged by the `transport` field; the two variants carry disjoint
/// field sets.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Long-lived streamable HTTP channel
    Http {
        /// Server URL (e.g. "https://api.example.com/mcp")
        url: String,

        /// Headers attached to every request on the channel
        #[serde(default)]
        headers: HashMap<String, String>,
    },

    /// Spawned subprocess speaking the protocol over stdio
    Stdio {
        /// Command to spawn
        command: String,

        /// Command arguments
        #[serde(default)]
        args: Vec<String>,

        /// Environment overlay applied on top of the parent environment
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

/// Configuration for a single system MCP server
#[derive(Debug, Clone, Deserialize)]
pub struct SystemServerConfig {
    /// Transport settings
    #[serde(flatten)]
    pub transport: TransportConfig,

    /// Disabled servers are skipped at startup (logged, not an error)
    #[serde(default)]
    pub disabled: bool,
}

/// On-disk shape: `{ "mcpServers": { name: config } }`
#[derive(Debug, Deserialize)]
struct SystemConfigFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: HashMap<String, SystemServerConfig>,
}

fn read_config_file(path: &Path) -> PoolResult<HashMap<String, SystemServerConfig>> {
    let contents = std::fs::read_to_string(path)?;
    let file: SystemConfigFile = serde_json::from_str(&contents)?;
    Ok(file.mcp_servers)
}

/// Load the system server configuration.
///
/// A missing or unparsable file is logged and treated as zero system
/// servers.
pub fn load_system_config(path: impl AsRef<Path>) -> HashMap<String, SystemServerConfig> {
    let path = path.as_ref();

    match read_config_file(path) {
        Ok(servers) => {
            tracing::info!(
                "[SystemConfig] Loaded {} system server(s) from {}",
                servers.len(),
                path.display()
            );
            servers
        }
        Err(e) => {
            tracing::warn!(
                "[SystemConfig] Could not load {}: {} - continuing with no system servers",
                path.display(),
                e
            );
            HashMap::new()
        }
    }
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Substitute `${VAR}` placeholders from the process environment.
///
/// Unresolved placeholders become the empty string. Applied to system
/// configuration strings only; user-supplied strings are used verbatim so
/// the server environment never leaks into user-controlled values.
pub fn expand_placeholders(input: &str) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

impl TransportConfig {
    /// Return a copy with every string field placeholder-expanded.
    pub fn expanded(&self) -> TransportConfig {
        match self {
            TransportConfig::Http { url, headers } => TransportConfig::Http {
                url: expand_placeholders(url),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.clone(), expand_placeholders(v)))
                    .collect(),
            },
            TransportConfig::Stdio { command, args, env } => TransportConfig::Stdio {
                command: expand_placeholders(command),
                args: args.iter().map(|a| expand_placeholders(a)).collect(),
                env: env
                    .iter()
                    .map(|(k, v)| (k.clone(), expand_placeholders(v)))
                    .collect(),
            },
        }
    }
}
