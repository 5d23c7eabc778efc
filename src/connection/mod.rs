//! Provider connections
//!
//! - `client`: `ProtocolClient`/`Connector` trait seams plus the production
//!   rmcp implementations (streamable HTTP and child-process stdio)
//! - `server`: `ConnectedServer`, the live unit of work owning one open
//!   connection and its namespaced tools

mod client;
mod server;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{Connector, ProtocolClient, RmcpClient, RmcpConnector};
pub use server::{
    connect_all, namespaced_tool_name, server_name_for_tool, ConnectedServer, ToolDescriptor,
    TOOL_NAMESPACE_PREFIX, TOOL_NAME_DELIMITER, UNKNOWN_SERVER,
};
