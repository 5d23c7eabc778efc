pub mod core;
pub mod logging;

// Server configuration: static system config, per-user records, validation
pub mod config;

// Transport connectors and live provider connections
pub mod connection;

// System and per-user connection pools
pub mod pool;

// Tool dispatch and lifecycle facade
pub mod manager;
