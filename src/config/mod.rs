//! Application Configuration
//!
//! All runtime options of the execution core as operator-tunable TOML values
//! with environment overrides.
//!
//! ## Loading Order
//!
//! 1. Explicit path (`--config` flag)
//! 2. `MIMIR_CONFIG` environment variable (path to TOML file)
//! 3. `mimir.toml` in the current working directory
//! 4. Built-in defaults
//!
//! After deserialization, prefixed-uppercase environment variables
//! (`MIMIR_SERVER_PORT`, `MIMIR_SCHEDULER_MAX_JOBS`, ...) override individual
//! keys, so containerized deployments need no config file at all.

mod app_config;

pub use app_config::*;
