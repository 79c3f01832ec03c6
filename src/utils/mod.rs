//! Configuration loading and validation

pub mod config;

pub use config::{AuxLinkConfig, CombinerConfig, ConfigError, LinkConfig};
