//! Pool manager error types

use thiserror::Error;

/// Errors that can occur in the connection pool manager
#[derive(Error, Debug)]
pub enum PoolError {
    /// IO error (e.g. reading the system config file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid server configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Server is not connected
    #[error("Server not connected: {0}")]
    NotConnected(String),
}

/// Result type alias for pool manager operations
pub type PoolResult<T> = Result<T, PoolError>;
