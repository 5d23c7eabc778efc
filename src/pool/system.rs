//! System server pool
//!
//! Boot-time pool of system-wide provider connections, loaded once from the
//! static config file. Tools from system servers are global: every tenant can
//! call them, and they take precedence over same-named tenant tools at
//! dispatch time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::load_system_config;
use crate::connection::{
    connect_all, server_name_for_tool, ConnectedServer, Connector, ToolDescriptor,
};

/// Long-lived pool of system provider connections
#[derive(Debug, Default)]
pub struct SystemServerPool {
    servers: Vec<Arc<ConnectedServer>>,
    tools: Vec<ToolDescriptor>,
    tool_to_server: HashMap<String, Arc<ConnectedServer>>,
}

impl SystemServerPool {
    /// Create an empty pool (the pre-initialization state)
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the system config and connect every enabled entry concurrently.
    ///
    /// A missing or corrupt config file degrades to an empty pool; providers
    /// that fail to connect are logged and excluded without affecting their
    /// siblings.
    pub async fn load(path: impl AsRef<Path>, connector: Arc<dyn Connector>) -> Self {
        let configs = load_system_config(path);

        let mut targets = Vec::new();
        for (name, config) in configs {
            if config.disabled {
                tracing::info!("[SystemServerPool] Skipping disabled server '{}'", name);
                continue;
            }
            // Placeholders are expanded for system configs only
            targets.push((name, config.transport.expanded()));
        }

        let servers = connect_all(targets, connector).await;

        let mut tools = Vec::new();
        let mut tool_to_server = HashMap::new();
        for server in &servers {
            for tool in server.tools() {
                tools.push(tool.clone());
                tool_to_server.insert(tool.name.clone(), server.clone());
            }
        }

        tracing::info!(
            "[SystemServerPool] {} server(s) connected, {} global tool(s)",
            servers.len(),
            tools.len()
        );

        Self {
            servers,
            tools,
            tool_to_server,
        }
    }

    /// All global tool descriptors
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Whether the namespaced name belongs to a system tool
    pub fn contains_tool(&self, namespaced: &str) -> bool {
        self.tool_to_server.contains_key(namespaced)
    }

    /// Resolve a namespaced name to its owning system server
    pub fn server_for_tool(&self, namespaced: &str) -> Option<Arc<ConnectedServer>> {
        self.tool_to_server.get(namespaced).cloned()
    }

    /// Names of the connected system servers
    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Provider name a namespaced tool name belongs to.
    ///
    /// Parsed from the name itself; malformed names resolve to the
    /// `"unknown"` sentinel rather than erroring.
    pub fn provider_name(namespaced: &str) -> String {
        server_name_for_tool(namespaced)
    }

    /// Close every system connection, best-effort, and clear the pool
    pub async fn shutdown(&mut self) {
        for server in self.servers.drain(..) {
            server.close().await;
        }
        self.tools.clear();
        self.tool_to_server.clear();
    }
}
