//! Core types shared across the pool manager

pub mod error;

pub use error::{PoolError, PoolResult};
