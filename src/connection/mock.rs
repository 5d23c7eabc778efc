//! Mock connector and client for tests
//!
//! Scripted by server name: which tools each provider exposes, which
//! providers fail to connect or to list tools, and how long a connect takes.
//! Connect and close counts are observable so tests can verify reconnection
//! and teardown behavior.
//!
//! Tool-name conventions understood by the mock client:
//! - `nodesc*`: listed without a description
//! - `broken`: calls return a provider-side error result
//! - `silent`: calls return an empty content list
//! - `fail`: calls fail with a transport error

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rmcp::model::{CallToolResult, Content, Tool};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::TransportConfig;

use super::client::{Connector, ProtocolClient};

#[derive(Clone, Default)]
struct ServerScript {
    tools: Vec<String>,
    fail_connect: bool,
    fail_listing: bool,
}

/// Scripted connector counting connects and closes
pub(crate) struct MockConnector {
    scripts: Mutex<HashMap<String, ServerScript>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    connect_delay: Option<Duration>,
    call_delay: Option<Duration>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            connect_delay: None,
            call_delay: None,
        }
    }

    pub fn with_server(self, name: &str, tools: &[&str]) -> Self {
        self.scripts.lock().unwrap().insert(
            name.to_string(),
            ServerScript {
                tools: tools.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            },
        );
        self
    }

    pub fn with_failing_server(self, name: &str) -> Self {
        self.scripts.lock().unwrap().insert(
            name.to_string(),
            ServerScript {
                fail_connect: true,
                ..Default::default()
            },
        );
        self
    }

    pub fn with_listing_failure(self, name: &str) -> Self {
        self.scripts.lock().unwrap().insert(
            name.to_string(),
            ServerScript {
                fail_listing: true,
                ..Default::default()
            },
        );
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// Number of successful transport opens so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of closed transports so far
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        name: &str,
        _transport: &TransportConfig,
    ) -> Result<Box<dyn ProtocolClient>> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no script for server '{}'", name))?;

        if script.fail_connect {
            return Err(anyhow!("connection refused"));
        }

        let seq = self.connects.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(Box::new(MockClient {
            server: name.to_string(),
            seq,
            tools: script.tools,
            fail_listing: script.fail_listing,
            call_delay: self.call_delay,
            closed: AtomicBool::new(false),
            closes: self.closes.clone(),
        }))
    }
}

pub(crate) struct MockClient {
    server: String,

    /// 1-based connection sequence number, echoed in call results so tests
    /// can tell connections apart
    seq: usize,

    tools: Vec<String>,
    fail_listing: bool,

    /// Calls started before close still sleep this long, then observe the
    /// closed flag, like a real transport torn down mid-request
    call_delay: Option<Duration>,
    closed: AtomicBool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        if self.fail_listing {
            return Err(anyhow!("listing failed"));
        }

        Ok(self
            .tools
            .iter()
            .map(|name| Tool {
                name: name.clone().into(),
                title: None,
                description: if name.starts_with("nodesc") {
                    None
                } else {
                    Some(format!("{} on {}", name, self.server).into())
                },
                input_schema: Arc::new(Map::new()),
                output_schema: None,
                annotations: None,
                icons: None,
                meta: None,
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult> {
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("connection closed"));
        }
        match name {
            "fail" => Err(anyhow!("transport closed")),
            "broken" => Ok(CallToolResult::error(vec![Content::text(format!(
                "{} failed on {}",
                name, self.server
            ))])),
            "silent" => Ok(CallToolResult::success(vec![])),
            _ => Ok(CallToolResult::success(vec![Content::text(format!(
                "{}:{} ok (conn {})",
                self.server, name, self.seq
            ))])),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
