//! Connection pools
//!
//! - `system`: boot-time, static, long-lived pool loaded from the system
//!   config file, shared by every tenant
//! - `user`: on-demand per-tenant pools with LRU and idle-TTL eviction

mod system;
mod user;

pub use system::SystemServerPool;
pub use user::{PoolOptions, UserPoolManager};
