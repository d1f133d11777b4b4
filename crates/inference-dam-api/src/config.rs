// crates/inference-dam-api/src/config.rs
// ============================================================================
// Module: Server Configuration
// Description: Validated configuration for the broker server.
// Purpose: Resolve flags and environment into hard-limited settings.
// Dependencies: inference-dam-dispatcher, thiserror
// ============================================================================

//! ## Overview
//! Configuration resolves in order: built-in defaults, environment variables
//! (`PORT`, `STORAGE_PATH`), then CLI flags applied by the binary. Validation
//! enforces hard limits on dispatcher settings so a typo cannot disable rate
//! limiting or spawn an unbounded worker pool.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use inference_dam_dispatcher::DispatcherConfig;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 8080;
/// Default on-disk database path.
pub const DEFAULT_STORAGE_PATH: &str = "./data/inference_dam.db";
/// Environment variable overriding the listen port.
pub const PORT_ENV_VAR: &str = "PORT";
/// Environment variable overriding the database path.
pub const STORAGE_PATH_ENV_VAR: &str = "STORAGE_PATH";
/// Maximum accepted request body size in bytes.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
/// Maximum allowed dispatch worker pool size.
const MAX_WORKERS_LIMIT: usize = 1_024;
/// Maximum allowed per-namespace dispatch rate.
const MAX_REQUESTS_PER_SECOND: f64 = 10_000.0;
/// Maximum allowed provider call timeout.
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(3_600);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The `PORT` environment value did not parse as a port number.
    #[error("invalid PORT value: {0}")]
    InvalidPort(String),
    /// A setting violated its hard limit.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Validated broker server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Path to the `SQLite` database file.
    pub storage_path: PathBuf,
    /// Enable the batched ingest writer on the store.
    pub batched_writes: bool,
    /// Dispatcher limits.
    pub dispatcher: DispatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            batched_writes: false,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Builds a configuration from defaults and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPort`] when `PORT` does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(port) = env::var(PORT_ENV_VAR) {
            config.port = port.parse().map_err(|_| ConfigError::InvalidPort(port))?;
        }
        if let Ok(path) = env::var(STORAGE_PATH_ENV_VAR) {
            if !path.is_empty() {
                config.storage_path = PathBuf::from(path);
            }
        }
        Ok(config)
    }

    /// Validates the configuration against hard limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a setting is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".to_string()));
        }
        if self.dispatcher.max_workers > MAX_WORKERS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_workers exceeds limit of {MAX_WORKERS_LIMIT}"
            )));
        }
        if self.dispatcher.requests_per_second <= 0.0 {
            return Err(ConfigError::Invalid(
                "requests_per_second must be positive".to_string(),
            ));
        }
        if self.dispatcher.requests_per_second > MAX_REQUESTS_PER_SECOND {
            return Err(ConfigError::Invalid(format!(
                "requests_per_second exceeds limit of {MAX_REQUESTS_PER_SECOND}"
            )));
        }
        if self.dispatcher.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request_timeout must be positive".to_string()));
        }
        if self.dispatcher.request_timeout > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::Invalid(format!(
                "request_timeout exceeds limit of {}s",
                MAX_REQUEST_TIMEOUT.as_secs()
            )));
        }
        if self.storage_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage_path must not be empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
