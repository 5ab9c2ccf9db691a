//! AppConfig - runtime options with serde defaults and env overrides
//!
//! Every section implements `Default` with the documented values, so a
//! missing or partial config file always yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// Sections
// ============================================================================

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port the REST façade binds
    #[serde(default = "defaults::server_port")]
    pub port: u16,
    /// Bind address
    #[serde(default = "defaults::server_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::server_port(),
            host: defaults::server_host(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Master switch; disabled skips recovery and the tick loop entirely
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    /// Cap on concurrently running jobs
    #[serde(default = "defaults::max_jobs")]
    pub max_jobs: usize,
    /// Tick loop granularity, seconds
    #[serde(default = "defaults::tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Per-job execution budget, seconds
    #[serde(default = "defaults::max_execution_secs")]
    pub max_execution_secs: u64,
    /// How long graceful shutdown waits for in-flight workers, seconds
    #[serde(default = "defaults::shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            max_jobs: defaults::max_jobs(),
            tick_interval_secs: defaults::tick_interval_secs(),
            max_execution_secs: defaults::max_execution_secs(),
            shutdown_grace_secs: defaults::shutdown_grace_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Persistence layer options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Sled database directory
    #[serde(default = "defaults::database_path")]
    pub database_path: PathBuf,
    /// History retention for executions, time-series and resolved alerts
    #[serde(default = "defaults::retention_days")]
    pub retention_days: u32,
    /// Background flush interval, seconds
    #[serde(default = "defaults::checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
    /// Where graceful shutdown writes the database backup
    #[serde(default = "defaults::backup_path")]
    pub backup_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: defaults::database_path(),
            retention_days: defaults::retention_days(),
            checkpoint_interval_secs: defaults::checkpoint_interval_secs(),
            backup_path: defaults::backup_path(),
        }
    }
}

impl PersistenceConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs.max(1))
    }
}

/// Plugin subsystem options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directories scanned for external plugin manifests
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    /// Scan `directories` at boot
    #[serde(default)]
    pub auto_discovery: bool,
    /// Default per-step execution timeout, seconds
    #[serde(default = "defaults::plugin_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            auto_discovery: false,
            timeout_secs: defaults::plugin_timeout_secs(),
        }
    }
}

impl PluginsConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Simulation engine options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "defaults::snapshot_interval")]
    pub default_snapshot_interval: u64,
    #[serde(default = "defaults::max_steps")]
    pub default_max_steps: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_snapshot_interval: defaults::snapshot_interval(),
            default_max_steps: defaults::max_steps(),
        }
    }
}

/// Root configuration for a deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

mod defaults {
    use std::path::PathBuf;

    pub fn server_port() -> u16 {
        8080
    }
    pub fn server_host() -> String {
        "0.0.0.0".to_string()
    }
    pub fn enabled() -> bool {
        true
    }
    pub fn max_jobs() -> usize {
        10
    }
    pub fn tick_interval_secs() -> u64 {
        30
    }
    pub fn max_execution_secs() -> u64 {
        300
    }
    pub fn shutdown_grace_secs() -> u64 {
        30
    }
    pub fn database_path() -> PathBuf {
        PathBuf::from("./data/mimir-db")
    }
    pub fn retention_days() -> u32 {
        30
    }
    pub fn checkpoint_interval_secs() -> u64 {
        300
    }
    pub fn backup_path() -> PathBuf {
        PathBuf::from("./data/mimir-backup")
    }
    pub fn plugin_timeout_secs() -> u64 {
        60
    }
    pub fn snapshot_interval() -> u64 {
        10
    }
    pub fn max_steps() -> u64 {
        1000
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Config load errors. Only an unreadable or unparsable explicit file is
/// fatal; missing implicit files fall through to defaults.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
}

impl AppConfig {
    /// Load configuration using the standard search order, then apply
    /// environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = explicit {
            let loaded = Self::load_from_file(path)?;
            info!(path = %path.display(), "Loaded config from --config");
            loaded
        } else if let Ok(env_path) = std::env::var("MIMIR_CONFIG") {
            let p = PathBuf::from(&env_path);
            if p.exists() {
                let loaded = Self::load_from_file(&p)?;
                info!(path = %p.display(), "Loaded config from MIMIR_CONFIG");
                loaded
            } else {
                warn!(path = %env_path, "MIMIR_CONFIG points to non-existent file, using defaults");
                Self::default()
            }
        } else {
            let local = PathBuf::from("mimir.toml");
            if local.exists() {
                let loaded = Self::load_from_file(&local)?;
                info!("Loaded config from ./mimir.toml");
                loaded
            } else {
                info!("No mimir.toml found — using built-in defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        for key in unknown_top_level_keys(&contents) {
            warn!(key = %key, "Unknown config section — ignoring");
        }

        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Apply `MIMIR_*` environment overrides on top of whatever was loaded.
    pub fn apply_env_overrides(&mut self) {
        override_parse("MIMIR_SERVER_PORT", &mut self.server.port);
        override_string("MIMIR_SERVER_HOST", &mut self.server.host);
        override_bool("MIMIR_SCHEDULER_ENABLED", &mut self.scheduler.enabled);
        override_parse("MIMIR_SCHEDULER_MAX_JOBS", &mut self.scheduler.max_jobs);
        override_parse(
            "MIMIR_SCHEDULER_TICK_INTERVAL",
            &mut self.scheduler.tick_interval_secs,
        );
        override_parse(
            "MIMIR_SCHEDULER_MAX_EXECUTION_TIME",
            &mut self.scheduler.max_execution_secs,
        );
        if let Ok(val) = std::env::var("MIMIR_PERSISTENCE_DATABASE_PATH") {
            self.persistence.database_path = PathBuf::from(val);
        }
        override_parse(
            "MIMIR_PERSISTENCE_RETENTION_DAYS",
            &mut self.persistence.retention_days,
        );
        override_parse("MIMIR_PLUGINS_TIMEOUT", &mut self.plugins.timeout_secs);
        override_parse(
            "MIMIR_SIMULATION_DEFAULT_SNAPSHOT_INTERVAL",
            &mut self.simulation.default_snapshot_interval,
        );
        override_parse(
            "MIMIR_SIMULATION_DEFAULT_MAX_STEPS",
            &mut self.simulation.default_max_steps,
        );
    }
}

fn override_parse<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(val) = std::env::var(var) {
        match val.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(var = %var, value = %val, "Ignoring unparsable env override"),
        }
    }
}

fn override_string(var: &str, slot: &mut String) {
    if let Ok(val) = std::env::var(var) {
        *slot = val;
    }
}

fn override_bool(var: &str, slot: &mut bool) {
    if let Ok(val) = std::env::var(var) {
        match val.to_lowercase().as_str() {
            "true" | "1" | "yes" => *slot = true,
            "false" | "0" | "no" => *slot = false,
            _ => warn!(var = %var, value = %val, "Ignoring unparsable boolean env override"),
        }
    }
}

/// Top-level sections this config recognizes; anything else in the user's
/// TOML draws a warning rather than an error.
fn unknown_top_level_keys(contents: &str) -> Vec<String> {
    const KNOWN: &[&str] = &["server", "scheduler", "persistence", "plugins", "simulation"];
    match contents.parse::<toml::Value>() {
        Ok(toml::Value::Table(table)) => table
            .keys()
            .filter(|k| !KNOWN.contains(&k.as_str()))
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.scheduler.max_jobs, 10);
        assert_eq!(config.scheduler.tick_interval_secs, 30);
        assert_eq!(config.scheduler.max_execution_secs, 300);
        assert_eq!(config.plugins.timeout_secs, 60);
        assert_eq!(config.simulation.default_snapshot_interval, 10);
        assert_eq!(config.simulation.default_max_steps, 1000);
        assert_eq!(config.persistence.retention_days, 30);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9999

            [scheduler]
            max_jobs = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.scheduler.max_jobs, 3);
        // untouched sections keep defaults
        assert_eq!(config.scheduler.tick_interval_secs, 30);
        assert_eq!(config.plugins.timeout_secs, 60);
    }

    #[test]
    fn test_unknown_sections_are_detected() {
        let unknown = unknown_top_level_keys("[server]\nport = 1\n[serverr]\nport = 2\n");
        assert_eq!(unknown, vec!["serverr".to_string()]);
    }

    #[test]
    fn test_env_override_applies() {
        let mut config = AppConfig::default();
        std::env::set_var("MIMIR_SERVER_PORT", "7070");
        std::env::set_var("MIMIR_SCHEDULER_ENABLED", "false");
        config.apply_env_overrides();
        std::env::remove_var("MIMIR_SERVER_PORT");
        std::env::remove_var("MIMIR_SCHEDULER_ENABLED");
        assert_eq!(config.server.port, 7070);
        assert!(!config.scheduler.enabled);
    }
}
