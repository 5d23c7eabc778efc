//! Server configuration
//!
//! - `system`: static system server config loaded from a JSON file at startup
//! - `user`: per-tenant server records supplied by a persistence collaborator
//! - `validate`: field-level validation and SSRF guard for user-supplied
//!   server definitions

mod system;
mod user;
mod validate;

pub use system::{
    expand_placeholders, load_system_config, SystemServerConfig, TransportConfig,
    SYSTEM_CONFIG_FILE,
};
pub use user::UserServerConfig;
pub use validate::{ConfigValidator, Violation, MAX_URL_LENGTH};
