//! Protocol client abstraction
//!
//! Wraps the rmcp client behind the `ProtocolClient`/`Connector` traits so
//! the pools can be exercised with test doubles. The production connector
//! speaks streamable HTTP (with per-connection default headers) or spawns a
//! stdio subprocess.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolRequestParams, CallToolResult, Tool};
use rmcp::service::RunningService;
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::config::TransportConfig;
use crate::core::PoolError;

/// The concrete transport type used for HTTP connections
pub type HttpClientTransport = StreamableHttpClientTransport<reqwest::Client>;

/// A live request/response channel to one tool provider.
///
/// "connect / list tools / call tool / close" is the whole capability this
/// crate needs from the protocol library.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// List the tools the provider currently exposes
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    /// Call a tool by its original (un-namespaced) name
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult>;

    /// Close the underlying transport. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Establishes one connection to one provider from a declarative config
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the named provider, producing a live client
    async fn connect(
        &self,
        name: &str,
        transport: &TransportConfig,
    ) -> Result<Box<dyn ProtocolClient>>;
}

/// Production client wrapping an rmcp running service
pub struct RmcpClient {
    /// Server name, for log and error messages
    name: String,

    /// The underlying rmcp service (None once closed)
    service: RwLock<Option<RunningService<RoleClient, ()>>>,
}

impl RmcpClient {
    fn new(name: String, service: RunningService<RoleClient, ()>) -> Self {
        Self {
            name,
            service: RwLock::new(Some(service)),
        }
    }
}

#[async_trait]
impl ProtocolClient for RmcpClient {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| PoolError::NotConnected(self.name.clone()))?;

        let result = service.list_tools(Default::default()).await?;

        tracing::debug!(
            "[RmcpClient] Got {} tools from '{}'",
            result.tools.len(),
            self.name
        );

        Ok(result.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| PoolError::NotConnected(self.name.clone()))?;

        tracing::debug!("[RmcpClient] Calling tool '{}' on '{}'", name, self.name);

        let result = service
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_string().into(),
                arguments,
                task: None,
            })
            .await?;

        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        let service = self.service.write().await.take();
        if let Some(service) = service {
            service
                .cancel()
                .await
                .with_context(|| format!("closing connection to '{}'", self.name))?;
        }
        Ok(())
    }
}

/// Production connector using rmcp transports
#[derive(Debug, Default, Clone)]
pub struct RmcpConnector;

impl RmcpConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }

    async fn connect_http(
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<RunningService<RoleClient, ()>> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                PoolError::InvalidConfig(format!(
                    "invalid header name '{}' for server '{}'",
                    key, name
                ))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                PoolError::InvalidConfig(format!(
                    "invalid header value for '{}' on server '{}'",
                    key, name
                ))
            })?;
            header_map.insert(header_name, header_value);
        }

        let http_client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()?;

        let transport = HttpClientTransport::with_client(
            http_client,
            StreamableHttpClientTransportConfig::with_uri(url.to_string()),
        );

        let service = ().serve(transport).await?;
        Ok(service)
    }

    async fn connect_stdio(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<RunningService<RoleClient, ()>> {
        let mut cmd = tokio::process::Command::new(command);
        // Parent environment is inherited; the declared overlay wins
        cmd.args(args).envs(env);

        let transport = TokioChildProcess::new(cmd)?;
        let service = ().serve(transport).await?;
        Ok(service)
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        name: &str,
        transport: &TransportConfig,
    ) -> Result<Box<dyn ProtocolClient>> {
        let service = match transport {
            TransportConfig::Http { url, headers } => {
                tracing::info!("[RmcpConnector] Connecting to '{}' at {}", name, url);
                Self::connect_http(name, url, headers).await?
            }
            TransportConfig::Stdio { command, args, env } => {
                tracing::info!("[RmcpConnector] Spawning '{}' via {}", name, command);
                Self::connect_stdio(command, args, env).await?
            }
        };

        Ok(Box::new(RmcpClient::new(name.to_string(), service)))
    }
}
