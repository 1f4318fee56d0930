//! Configuration module for the aggregator.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Database settings (path, connection pool, busy timeout)
//! - Pipeline settings (queue capacity, workers, shutdown behavior)

mod app;
mod validation;

pub use app::{AppConfig, DatabaseConfig, PipelineConfig, ServerConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
