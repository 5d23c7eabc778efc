//! Connected server
//!
//! The live unit of work: one open transport, the namespaced tools the
//! provider exposes, and the map from namespaced name back to the provider's
//! original tool name. A `ConnectedServer` is owned by exactly one pool and
//! exists only while its transport is open.

use anyhow::Result;
use rmcp::model::CallToolResult;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::TransportConfig;

use super::client::{Connector, ProtocolClient};

/// Prefix on every namespaced tool name
pub const TOOL_NAMESPACE_PREFIX: &str = "mcp";

/// Delimiter between prefix, server name and original tool name
pub const TOOL_NAME_DELIMITER: &str = "__";

/// Sentinel returned when a namespaced name cannot be parsed
pub const UNKNOWN_SERVER: &str = "unknown";

/// Build the namespaced tool name `mcp__<server>__<tool>`.
///
/// Namespacing is mandatory: different providers may expose tools with
/// identical original names, and the prefix guarantees uniqueness within a
/// pool.
pub fn namespaced_tool_name(server: &str, tool: &str) -> String {
    format!(
        "{}{}{}{}{}",
        TOOL_NAMESPACE_PREFIX, TOOL_NAME_DELIMITER, server, TOOL_NAME_DELIMITER, tool
    )
}

/// Extract the server name from a namespaced tool name.
///
/// Malformed names resolve to the `"unknown"` sentinel rather than erroring.
pub fn server_name_for_tool(namespaced: &str) -> String {
    let mut parts = namespaced.splitn(3, TOOL_NAME_DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(TOOL_NAMESPACE_PREFIX), Some(server), Some(_tool)) if !server.is_empty() => {
            server.to_string()
        }
        _ => UNKNOWN_SERVER.to_string(),
    }
}

/// A namespaced tool descriptor, suitable for direct inclusion in an LLM
/// tool-calling request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Namespaced tool name (`mcp__<server>__<tool>`)
    pub name: String,

    /// Provider's description, copied verbatim (empty string if absent)
    pub description: String,

    /// Provider's input schema, copied verbatim
    pub input_schema: Value,
}

/// One live provider connection plus its discovered tools
pub struct ConnectedServer {
    name: String,
    client: Box<dyn ProtocolClient>,
    tools: Vec<ToolDescriptor>,

    /// Namespaced name back to the provider's original tool name
    original_names: HashMap<String, String>,
}

impl std::fmt::Debug for ConnectedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedServer")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl ConnectedServer {
    /// Connect to one provider and discover its tools.
    ///
    /// Connection failure and tool-listing failure are both terminal for this
    /// one provider; the error is propagated to the caller as a per-provider
    /// failure.
    pub async fn connect(
        name: &str,
        transport: &TransportConfig,
        connector: &dyn Connector,
    ) -> Result<Self> {
        let client = connector.connect(name, transport).await?;

        let raw_tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                // Don't leak the open transport when discovery fails
                if let Err(close_err) = client.close().await {
                    tracing::debug!(
                        "[ConnectedServer] Close after failed discovery on '{}': {}",
                        name,
                        close_err
                    );
                }
                return Err(e);
            }
        };

        let mut tools = Vec::with_capacity(raw_tools.len());
        let mut original_names = HashMap::with_capacity(raw_tools.len());

        for tool in raw_tools {
            let namespaced = namespaced_tool_name(name, &tool.name);
            original_names.insert(namespaced.clone(), tool.name.to_string());
            tools.push(ToolDescriptor {
                name: namespaced,
                description: tool.description.as_deref().unwrap_or("").to_string(),
                input_schema: Value::Object(tool.input_schema.as_ref().clone()),
            });
        }

        tracing::info!(
            "[ConnectedServer] Connected '{}' with {} tool(s)",
            name,
            tools.len()
        );

        Ok(Self {
            name: name.to_string(),
            client,
            tools,
            original_names,
        })
    }

    /// Get the server name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespaced tool descriptors exposed by this server
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Map a namespaced tool name back to the provider's original name
    pub fn original_name(&self, namespaced: &str) -> Option<&str> {
        self.original_names.get(namespaced).map(String::as_str)
    }

    /// Call a tool by its original name
    pub async fn call_tool(
        &self,
        original_name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult> {
        self.client.call_tool(original_name, arguments).await
    }

    /// Close the underlying transport.
    ///
    /// Best-effort: a close failure is logged and swallowed, never fatal to
    /// the caller.
    pub async fn close(&self) {
        if let Err(e) = self.client.close().await {
            tracing::warn!("[ConnectedServer] Failed to close '{}': {}", self.name, e);
        }
    }
}

/// Connect every listed provider concurrently and keep the successes.
///
/// Settle-all semantics: each provider's future captures its own failure, so
/// one unreachable provider never aborts or cancels its siblings.
pub async fn connect_all(
    targets: Vec<(String, TransportConfig)>,
    connector: Arc<dyn Connector>,
) -> Vec<Arc<ConnectedServer>> {
    let attempts = targets.into_iter().map(|(name, transport)| {
        let connector = connector.clone();
        async move {
            match ConnectedServer::connect(&name, &transport, connector.as_ref()).await {
                Ok(server) => Some(Arc::new(server)),
                Err(e) => {
                    tracing::warn!("[ConnectedServer] Failed to connect '{}': {}", name, e);
                    None
                }
            }
        }
    });

    futures::future::join_all(attempts)
        .await
        .into_iter()
        .flatten()
        .collect()
}
