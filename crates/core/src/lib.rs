pub mod config;
pub mod constants;
pub mod errors;
pub mod logging;

pub use config::{
    AppConfig, BundlerConfig, DiscoveryConfig, LoggingConfig, NetworkConfig, QueueConfig,
};
pub use errors::{GridError, GridResult};
