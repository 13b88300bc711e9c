//! # Target Configuration
//!
//! Describes where the target application lives, how to launch it, and the
//! timing used around launch, shutdown and profiling requests. Values come
//! from defaults, an optional TOML/JSON file, and environment overrides.
//!
//! ## Environment Variables
//!
//! - `PERFCHECK_APP_ROOT` - Application root directory (default: `.`)
//! - `PERFCHECK_HOST` - Bind host for the target (default: `127.0.0.1`)
//! - `PERFCHECK_PORT` - Bind port for the target (default: 3031)
//! - `PERFCHECK_LAUNCH_PROGRAM` - Server launcher executable (default: `bundle`)
//! - `PERFCHECK_LAUNCH_ARGS` - Whitespace separated launcher arguments (default: `exec rails server`)
//! - `PERFCHECK_START_GRACE` - Wait after launch, humantime format (default: `1500ms`)
//! - `PERFCHECK_STOP_GRACE` - Wait after the quit signal (default: `1500ms`)
//! - `PERFCHECK_READ_TIMEOUT` - HTTP read timeout while profiling (default: `1000s`)
//! - `PERFCHECK_KILL_AFTER` - Escalate to SIGKILL this long after the grace period (default: unset)

use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Fully validated configuration for one benchmark target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub app_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub launch_program: String,
    pub launch_args: Vec<String>,
    #[serde(with = "humantime_serde_compat")]
    pub start_grace: Duration,
    #[serde(with = "humantime_serde_compat")]
    pub stop_grace: Duration,
    #[serde(with = "humantime_serde_compat")]
    pub read_timeout: Duration,
    #[serde(
        with = "humantime_serde_compat::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub kill_after: Option<Duration>,
    /// PID file written by the target, relative to `app_root`
    pub pid_file: PathBuf,
    /// Directory the target writes profiler artifacts into, relative to `app_root`
    pub artifact_dir: PathBuf,
    /// Directory the target serves profiler results from, relative to `app_root`
    pub published_artifact_dir: PathBuf,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            app_root: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: 3031,
            launch_program: "bundle".to_string(),
            launch_args: vec!["exec".into(), "rails".into(), "server".into()],
            start_grace: Duration::from_millis(1500),
            stop_grace: Duration::from_millis(1500),
            read_timeout: Duration::from_secs(1000),
            kill_after: None,
            pid_file: PathBuf::from("tmp/pids/server.pid"),
            artifact_dir: PathBuf::from("tmp/perf_check/miniprofiler"),
            published_artifact_dir: PathBuf::from("tmp/miniprofiler"),
        }
    }
}

impl TargetConfig {
    /// Load a configuration file. `.json` files are parsed as JSON, anything
    /// else as TOML. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: TargetConfig = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        TargetConfigBuilder::from(config).build()
    }

    /// `host:port` of the target.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pid_file_path(&self) -> PathBuf {
        self.app_root.join(&self.pid_file)
    }

    pub fn artifact_dir_path(&self) -> PathBuf {
        self.app_root.join(&self.artifact_dir)
    }

    pub fn published_artifact_dir_path(&self) -> PathBuf {
        self.app_root.join(&self.published_artifact_dir)
    }
}

/// Builder for `TargetConfig` with environment variable support
#[derive(Debug, Clone, Default)]
pub struct TargetConfigBuilder {
    config: TargetConfig,
}

impl From<TargetConfig> for TargetConfigBuilder {
    fn from(config: TargetConfig) -> Self {
        Self { config }
    }
}

impl TargetConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables on top of the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides to the current values
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(root) = get_env_string("PERFCHECK_APP_ROOT") {
            self = self.app_root(root);
        }
        if let Some(host) = get_env_string("PERFCHECK_HOST") {
            self = self.host(host);
        }
        if let Some(port) = get_env_u16("PERFCHECK_PORT")? {
            self = self.port(port);
        }
        if let Some(program) = get_env_string("PERFCHECK_LAUNCH_PROGRAM") {
            self = self.launch_program(program);
        }
        if let Some(args) = get_env_string("PERFCHECK_LAUNCH_ARGS") {
            self = self.launch_args(args.split_whitespace().map(String::from));
        }
        if let Some(grace) = get_env_duration("PERFCHECK_START_GRACE")? {
            self = self.start_grace(grace);
        }
        if let Some(grace) = get_env_duration("PERFCHECK_STOP_GRACE")? {
            self = self.stop_grace(grace);
        }
        if let Some(timeout) = get_env_duration("PERFCHECK_READ_TIMEOUT")? {
            self = self.read_timeout(timeout);
        }
        if let Some(kill_after) = get_env_duration("PERFCHECK_KILL_AFTER")? {
            self = self.kill_after(Some(kill_after));
        }

        Ok(self)
    }

    #[must_use]
    pub fn app_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.app_root = root.into();
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the launcher executable
    #[must_use]
    pub fn launch_program(mut self, program: impl Into<String>) -> Self {
        self.config.launch_program = program.into();
        self
    }

    /// Set the arguments placed before the bind/daemonize flags
    #[must_use]
    pub fn launch_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.launch_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn start_grace(mut self, grace: Duration) -> Self {
        self.config.start_grace = grace;
        self
    }

    #[must_use]
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.config.stop_grace = grace;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Enable SIGKILL escalation after the stop grace period
    #[must_use]
    pub fn kill_after(mut self, kill_after: Option<Duration>) -> Self {
        self.config.kill_after = kill_after;
        self
    }

    #[must_use]
    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pid_file = path.into();
        self
    }

    #[must_use]
    pub fn artifact_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.artifact_dir = path.into();
        self
    }

    #[must_use]
    pub fn published_artifact_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.published_artifact_dir = path.into();
        self
    }

    /// Validate configuration and build `TargetConfig`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<TargetConfig, ConfigError> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let config = &self.config;

        if config.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "host cannot be empty".to_string(),
            ));
        }
        if config.port == 0 {
            return Err(ConfigError::ValidationError(
                "port must be greater than 0".to_string(),
            ));
        }
        if config.launch_program.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "launch_program cannot be empty".to_string(),
            ));
        }
        if config.read_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "read_timeout must be greater than 0".to_string(),
            ));
        }
        if config.pid_file.as_os_str().is_empty() || config.artifact_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "pid_file and artifact_dir cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn get_env_u16(key: &str) -> Result<Option<u16>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u16>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u16 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_duration(key: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(key) {
        Ok(val) => humantime::parse_duration(&val)
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid duration value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

/// Durations as humantime strings ("1500ms", "2s") in config files.
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
