//! KDL configuration parsing for the Decap build scheduler.
//!
//! This crate handles parsing of the daemon configuration (decap.kdl):
//! - Cluster namespace and build pod template settings
//! - Lock TTL, deferral interval and retry settings
//! - Lock and deferral store selection
//! - Statically declared projects

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    BuildScriptsConfig, RetryConfig, StoreBackend, SystemConfig, load_system_config,
    parse_system_config,
};
