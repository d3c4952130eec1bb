pub mod config;
pub mod logging;
pub mod bootstrap;

pub use config::{ClusterConfig, Config, LoggingConfig, SelectionStrategy};
