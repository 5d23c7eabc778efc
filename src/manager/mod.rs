//! Tool pool manager
//!
//! The facade tying the pools together: lifecycle (construct → initialize →
//! serve → shutdown), tool dispatch with system-first precedence, connection
//! testing for user servers, and pool invalidation. All state is owned by a
//! single `ToolPoolManager` instance injected into callers; there are no
//! ambient globals.

use rmcp::model::{CallToolResult, RawContent};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::{
    ConfigValidator, TransportConfig, UserServerConfig, SYSTEM_CONFIG_FILE,
};
use crate::connection::{ConnectedServer, Connector, RmcpConnector, ToolDescriptor};
use crate::pool::{PoolOptions, SystemServerPool, UserPoolManager};

/// Budget for a user-server connection test (connect + list tools)
pub const TEST_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Placeholder returned when a provider's result carries no text content
const EMPTY_RESULT_PLACEHOLDER: &str = "(no content)";

/// Result of one tool invocation.
///
/// Invocation failures are always data, never exceptions: unknown tools,
/// unmappable names, and transport errors all come back with `is_error` set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    /// Flattened text content of the provider's response
    pub content: String,

    /// Provider error flag, or true for manager-side failures
    pub is_error: bool,
}

impl InvocationResult {
    fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Result of testing a user server connection
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TestConnectionResult {
    /// The server answered within the budget; original tool names listed
    Tools { tools: Vec<String> },

    /// Connection, discovery or timeout failure
    Error { error: String },
}

/// Owns the system pool and the per-tenant pool table, and routes tool
/// invocations to the right live connection
pub struct ToolPoolManager {
    connector: Arc<dyn Connector>,
    config_path: PathBuf,
    system: RwLock<SystemServerPool>,
    users: UserPoolManager,
}

impl ToolPoolManager {
    /// Create a manager using the production rmcp connector and the default
    /// system config file
    pub fn new() -> Self {
        Self::with_connector(
            Arc::new(RmcpConnector::new()),
            SYSTEM_CONFIG_FILE,
            PoolOptions::default(),
        )
    }

    /// Create a manager with a custom connector, config path and pool
    /// options
    pub fn with_connector(
        connector: Arc<dyn Connector>,
        config_path: impl Into<PathBuf>,
        options: PoolOptions,
    ) -> Self {
        Self {
            connector: connector.clone(),
            config_path: config_path.into(),
            system: RwLock::new(SystemServerPool::new()),
            users: UserPoolManager::new(connector, options),
        }
    }

    /// Load the system pool and start the background eviction sweep.
    ///
    /// Called once at process start; the caller guarantees a single call.
    pub async fn initialize_system_pools(&self) {
        let pool = SystemServerPool::load(&self.config_path, self.connector.clone()).await;
        *self.system.write().await = pool;
        self.users.start_sweeper();
    }

    /// All global (system) tool descriptors
    pub async fn system_tools(&self) -> Vec<ToolDescriptor> {
        self.system.read().await.tools().to_vec()
    }

    /// The tenant's namespaced tool descriptors, building the pool on demand
    pub async fn tools_for_user(
        &self,
        user_id: &str,
        configs: &[UserServerConfig],
    ) -> Vec<ToolDescriptor> {
        self.users.tools_for_tenant(user_id, configs).await
    }

    /// Tear down the tenant's pool so the next lookup reconnects with fresh
    /// config. Mandatory after any mutation to the tenant's server records.
    pub async fn invalidate_user(&self, user_id: &str) {
        self.users.invalidate_tenant(user_id).await;
    }

    /// Current system server names, for the reserved-name validation rule
    pub async fn reserved_server_names(&self) -> Vec<String> {
        self.system.read().await.server_names()
    }

    /// Build a validator seeded with the current system server names
    pub async fn validator(&self) -> ConfigValidator {
        ConfigValidator::new(self.reserved_server_names().await)
    }

    /// Invoke a namespaced tool.
    ///
    /// Resolution checks the system pool first (system tools are global and
    /// take precedence), then the tenant's pool when a user id is supplied.
    pub async fn invoke(
        &self,
        user_id: Option<&str>,
        tool_name: &str,
        arguments: &Value,
    ) -> InvocationResult {
        // Resolve before dispatching so the system lock is not held across
        // the provider call
        let system_server = {
            let system = self.system.read().await;
            system.server_for_tool(tool_name)
        };
        let server = match system_server {
            Some(server) => Some(server),
            None => match user_id {
                Some(user_id) => self.users.server_for_tool(user_id, tool_name).await,
                None => None,
            },
        };

        let Some(server) = server else {
            tracing::warn!("[ToolPoolManager] Unknown tool '{}'", tool_name);
            return InvocationResult::error(format!("Unknown tool: {}", tool_name));
        };

        self.dispatch(&server, tool_name, arguments).await
    }

    async fn dispatch(
        &self,
        server: &ConnectedServer,
        tool_name: &str,
        arguments: &Value,
    ) -> InvocationResult {
        // Should be unreachable given the registry invariants, but a stale
        // map must come back as data, not a panic
        let Some(original) = server.original_name(tool_name).map(str::to_string) else {
            tracing::error!(
                "[ToolPoolManager] No original name for '{}' on server '{}'",
                tool_name,
                server.name()
            );
            return InvocationResult::error(format!(
                "Cannot resolve original tool name for: {}",
                tool_name
            ));
        };

        let arguments = arguments.as_object().cloned();

        match server.call_tool(&original, arguments).await {
            Ok(result) => flatten_result(result),
            Err(e) => {
                tracing::warn!("[ToolPoolManager] Tool call '{}' failed: {}", tool_name, e);
                InvocationResult::error(format!("Tool call failed: {}", e))
            }
        }
    }

    /// Test a user server by racing connect + list-tools against a fixed
    /// budget. The probe connection is closed either way.
    pub async fn test_connection(&self, config: &UserServerConfig) -> TestConnectionResult {
        let transport = TransportConfig::Http {
            url: config.url.clone(),
            headers: config.headers.clone(),
        };

        let attempt = ConnectedServer::connect(&config.name, &transport, self.connector.as_ref());

        match tokio::time::timeout(TEST_CONNECTION_TIMEOUT, attempt).await {
            Ok(Ok(server)) => {
                let tools = server
                    .tools()
                    .iter()
                    .filter_map(|t| server.original_name(&t.name))
                    .map(str::to_string)
                    .collect();
                server.close().await;
                TestConnectionResult::Tools { tools }
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    "[ToolPoolManager] Test connection to '{}' failed: {}",
                    config.name,
                    e
                );
                TestConnectionResult::Error {
                    error: format!("Connection failed: {}", e),
                }
            }
            Err(_) => TestConnectionResult::Error {
                error: format!(
                    "Connection timed out after {}s",
                    TEST_CONNECTION_TIMEOUT.as_secs()
                ),
            },
        }
    }

    /// Close every system and tenant connection, cancel the sweeper, and
    /// clear all state.
    ///
    /// Every close is best-effort and independently caught. Safe to call on
    /// a manager that was never initialized or only partially initialized.
    pub async fn shutdown(&self) {
        tracing::info!("[ToolPoolManager] Shutting down");
        self.users.shutdown().await;
        self.system.write().await.shutdown().await;
    }
}

impl Default for ToolPoolManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten a provider response into a single joined text string,
/// concatenating only text-typed content blocks and copying the provider's
/// error flag
fn flatten_result(result: CallToolResult) -> InvocationResult {
    let is_error = result.is_error.unwrap_or(false);

    let mut parts = Vec::new();
    for content in result.content {
        if let RawContent::Text(text) = &content.raw {
            parts.push(text.text.clone());
        }
    }

    let content = if parts.is_empty() {
        EMPTY_RESULT_PLACEHOLDER.to_string()
    } else {
        parts.join("\n")
    };

    InvocationResult { content, is_error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::MockConnector;
    use serde_json::json;
    use std::io::Write;

    const SYSTEM_CONFIG: &str = r#"{
        "mcpServers": {
            "shared": { "transport": "http", "url": "https://system.example.com/mcp" }
        }
    }"#;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();
        file
    }

    fn user_config(name: &str) -> UserServerConfig {
        UserServerConfig::new(
            format!("id-{}", name),
            "tenant-a",
            name,
            format!("https://{}.example.com/mcp", name),
        )
    }

    async fn manager_with(
        connector: MockConnector,
        config_json: &str,
    ) -> (ToolPoolManager, Arc<MockConnector>, tempfile::NamedTempFile) {
        let file = write_config(config_json);
        let connector = Arc::new(connector);
        let manager = ToolPoolManager::with_connector(
            connector.clone(),
            file.path(),
            PoolOptions::default(),
        );
        manager.initialize_system_pools().await;
        (manager, connector, file)
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool_returns_error_result() {
        let (manager, _, _file) =
            manager_with(MockConnector::new().with_server("shared", &["search"]), SYSTEM_CONFIG)
                .await;

        let result = manager.invoke(None, "mcp__nope__missing", &json!({})).await;
        assert!(result.is_error);
        assert!(result.content.contains("Unknown tool"));

        // Unknown tenant behaves the same, no panic
        let result = manager
            .invoke(Some("ghost"), "mcp__nope__missing", &json!({}))
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_invoke_system_tool() {
        let (manager, _, _file) =
            manager_with(MockConnector::new().with_server("shared", &["search"]), SYSTEM_CONFIG)
                .await;

        let result = manager
            .invoke(None, "mcp__shared__search", &json!({"q": "x"}))
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("shared:search ok"));
    }

    #[tokio::test]
    async fn test_system_tool_takes_precedence_over_tenant_tool() {
        // A tenant server named like the system server produces the same
        // namespaced tool name; the system connection (conn 1) must win.
        let (manager, connector, _file) =
            manager_with(MockConnector::new().with_server("shared", &["search"]), SYSTEM_CONFIG)
                .await;

        let tools = manager
            .tools_for_user("tenant-a", &[user_config("shared")])
            .await;
        assert_eq!(tools[0].name, "mcp__shared__search");
        assert_eq!(connector.connect_count(), 2);

        let result = manager
            .invoke(Some("tenant-a"), "mcp__shared__search", &json!({}))
            .await;
        assert!(result.content.contains("(conn 1)"));
    }

    #[tokio::test]
    async fn test_invoke_user_tool() {
        let (manager, _, _file) = manager_with(
            MockConnector::new()
                .with_server("shared", &["search"])
                .with_server("weather", &["lookup"]),
            SYSTEM_CONFIG,
        )
        .await;

        manager
            .tools_for_user("tenant-a", &[user_config("weather")])
            .await;

        let result = manager
            .invoke(Some("tenant-a"), "mcp__weather__lookup", &json!({}))
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("weather:lookup ok"));

        // Without a tenant id, tenant tools are unreachable
        let result = manager.invoke(None, "mcp__weather__lookup", &json!({})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_invoke_flattens_content_and_copies_error_flag() {
        let (manager, _, _file) = manager_with(
            MockConnector::new().with_server("shared", &["broken", "silent", "fail"]),
            SYSTEM_CONFIG,
        )
        .await;

        // Provider-side error flag is copied through
        let result = manager.invoke(None, "mcp__shared__broken", &json!({})).await;
        assert!(result.is_error);
        assert!(result.content.contains("broken failed"));

        // Empty content becomes the placeholder
        let result = manager.invoke(None, "mcp__shared__silent", &json!({})).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "(no content)");

        // Transport errors come back as data, never as panics
        let result = manager.invoke(None, "mcp__shared__fail", &json!({})).await;
        assert!(result.is_error);
        assert!(result.content.contains("Tool call failed"));
    }

    #[tokio::test]
    async fn test_test_connection_success_and_failure() {
        let (manager, connector, _file) = manager_with(
            MockConnector::new()
                .with_server("shared", &["search"])
                .with_server("weather", &["lookup", "forecast"])
                .with_failing_server("down"),
            SYSTEM_CONFIG,
        )
        .await;
        let closes_before = connector.close_count();

        match manager.test_connection(&user_config("weather")).await {
            TestConnectionResult::Tools { mut tools } => {
                tools.sort_unstable();
                assert_eq!(tools, vec!["forecast", "lookup"]);
            }
            TestConnectionResult::Error { error } => panic!("unexpected error: {}", error),
        }
        // The probe connection was closed
        assert_eq!(connector.close_count(), closes_before + 1);

        match manager.test_connection(&user_config("down")).await {
            TestConnectionResult::Error { error } => {
                assert!(error.contains("Connection failed"));
            }
            TestConnectionResult::Tools { .. } => panic!("expected an error"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_test_connection_times_out() {
        let (manager, _, _file) = manager_with(
            MockConnector::new()
                .with_server("shared", &["search"])
                .with_server("slow", &["lookup"])
                .with_connect_delay(Duration::from_secs(30)),
            SYSTEM_CONFIG,
        )
        .await;

        match manager.test_connection(&user_config("slow")).await {
            TestConnectionResult::Error { error } => {
                assert!(error.contains("timed out"));
            }
            TestConnectionResult::Tools { .. } => panic!("expected a timeout"),
        }
    }

    #[tokio::test]
    async fn test_reserved_names_include_system_servers() {
        let (manager, _, _file) =
            manager_with(MockConnector::new().with_server("shared", &["search"]), SYSTEM_CONFIG)
                .await;

        assert_eq!(manager.reserved_server_names().await, vec!["shared"]);

        let validator = manager.validator().await;
        let violations =
            validator.validate_create("shared", "https://api.example.com/mcp", None);
        assert!(violations.iter().any(|v| v.message.contains("reserved")));
    }

    #[tokio::test]
    async fn test_shutdown_without_initialize_is_safe() {
        let connector = Arc::new(MockConnector::new());
        let manager = ToolPoolManager::with_connector(
            connector,
            "/nonexistent/mcp_servers.json",
            PoolOptions::default(),
        );

        manager.shutdown().await;
        assert!(manager.system_tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_inflight_invocation_yields_error_result() {
        let (manager, _, _file) = manager_with(
            MockConnector::new()
                .with_server("shared", &["search"])
                .with_call_delay(Duration::from_millis(50)),
            SYSTEM_CONFIG,
        )
        .await;
        let manager = Arc::new(manager);

        let call = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager.invoke(None, "mcp__shared__search", &json!({})).await
            })
        };

        // Let the call reach the provider, then tear everything down
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.shutdown().await;

        let result = call.await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("Tool call failed"));
    }

    #[tokio::test]
    async fn test_shutdown_closes_system_and_tenant_pools() {
        let (manager, connector, _file) = manager_with(
            MockConnector::new()
                .with_server("shared", &["search"])
                .with_server("weather", &["lookup"]),
            SYSTEM_CONFIG,
        )
        .await;

        manager
            .tools_for_user("tenant-a", &[user_config("weather")])
            .await;

        manager.shutdown().await;
        assert_eq!(connector.close_count(), 2);
        assert!(manager.system_tools().await.is_empty());
    }
}
