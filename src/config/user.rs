//! User server configuration
//!
//! Per-tenant MCP server records. Owned by an external persistence
//! collaborator; this crate only ever reads a snapshot passed in per call.
//! Records are expected to have passed validation (`ConfigValidator`) on the
//! create/update path and are used verbatim at connect time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A user-configured MCP server (HTTP transport only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserServerConfig {
    /// Unique identifier of this record
    pub id: String,

    /// Owning tenant
    pub user_id: String,

    /// Display name, also used for tool namespacing
    pub name: String,

    /// Destination URL (https only, enforced by validation)
    pub url: String,

    /// Flat header map attached to every request
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Disabled servers are skipped when building the tenant's pool
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl UserServerConfig {
    /// Create a new enabled config (mainly for tests and examples)
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            name: name.into(),
            url: url.into(),
            headers: HashMap::new(),
            enabled: true,
        }
    }

    /// Set the header map
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Set whether this server is enabled
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
