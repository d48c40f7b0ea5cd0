//! Synchronizer Configuration - cloud credentials, polling policy and storage paths
//!
//! Every field has a serde default matching `config::defaults`, so an empty
//! or missing `sync_config.toml` yields the stock behaviour.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "OWEN_SYNC_CONFIG";

/// Environment variable overriding `cloud.login`.
pub const LOGIN_ENV_VAR: &str = "OWEN_LOGIN";

/// Environment variable overriding `cloud.password`.
pub const PASSWORD_ENV_VAR: &str = "OWEN_PASSWORD";

/// Config file looked up in the working directory.
const LOCAL_CONFIG_FILE: &str = "sync_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one synchronizer deployment.
///
/// Load with `SyncConfig::load()` which searches:
/// 1. `$OWEN_SYNC_CONFIG` env var
/// 2. `./sync_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// OWEN Cloud endpoint and credentials
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Poll cadence, debounce and recovery thresholds
    #[serde(default)]
    pub polling: PollingConfig,

    /// File locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Read-only dashboard
    #[serde(default)]
    pub server: ServerConfig,
}

impl SyncConfig {
    /// Load configuration using the standard search order, then apply
    /// credential overrides from the environment.
    pub fn load() -> Self {
        let mut config = Self::load_file_or_default();
        config.apply_env_overrides();
        config
    }

    fn load_file_or_default() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded sync config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load sync config, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded sync config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| match e {
                ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
                other => other,
            })?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Override credentials with `OWEN_LOGIN` / `OWEN_PASSWORD` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(login) = std::env::var(LOGIN_ENV_VAR) {
            if !login.is_empty() {
                self.cloud.login = login;
            }
        }
        if let Ok(password) = std::env::var(PASSWORD_ENV_VAR) {
            if !password.is_empty() {
                self.cloud.password = password;
            }
        }
    }

    /// Validate tunables for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.polling;
        let mut errors: Vec<String> = Vec::new();

        if self.cloud.api_url.trim().is_empty() {
            errors.push("cloud.api_url must not be empty".to_string());
        }
        for (value, name) in [
            (self.cloud.read_timeout_secs, "cloud.read_timeout_secs"),
            (self.cloud.write_transport_timeout_secs, "cloud.write_transport_timeout_secs"),
            (self.cloud.write_confirm_timeout_secs, "cloud.write_confirm_timeout_secs"),
            (p.active_interval_ms, "polling.active_interval_ms"),
            (p.idle_interval_secs, "polling.idle_interval_secs"),
            (p.min_cycle_secs, "polling.min_cycle_secs"),
            (p.token_ttl_secs, "polling.token_ttl_secs"),
        ] {
            if value == 0 {
                errors.push(format!("{} must be > 0", name));
            }
        }
        if p.max_fetch_errors == 0 {
            errors.push("polling.max_fetch_errors must be > 0".to_string());
        }
        if p.max_missing_sync == 0 {
            errors.push("polling.max_missing_sync must be > 0".to_string());
        }
        if p.cycle_history_len == 0 {
            errors.push("polling.cycle_history_len must be > 0".to_string());
        }
        if p.active_window_start_secs > p.active_window_end_secs {
            errors.push(format!(
                "polling.active_window_start_secs ({}) must be <= active_window_end_secs ({})",
                p.active_window_start_secs, p.active_window_end_secs
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Validation that only applies when the loop is about to talk to the cloud.
    pub fn validate_for_run(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let mut errors = Vec::new();
        if self.cloud.login.is_empty() {
            errors.push(format!("cloud.login is not set (or export {})", LOGIN_ENV_VAR));
        }
        if self.cloud.password.is_empty() {
            errors.push(format!("cloud.password is not set (or export {})", PASSWORD_ENV_VAR));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Full path of the CSV export.
    pub fn csv_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.csv_file)
    }

    /// Full path of the persisted device config.
    pub fn device_config_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.device_config_file)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration loading / validation errors
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Config validation failed:")?;
                for err in errors {
                    write!(f, "\n  - {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Sections
// ============================================================================

/// OWEN Cloud endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_transport_timeout")]
    pub write_transport_timeout_secs: u64,
    #[serde(default = "default_write_confirm_timeout")]
    pub write_confirm_timeout_secs: u64,
}

fn default_api_url() -> String { defaults::API_URL.to_string() }
fn default_read_timeout() -> u64 { defaults::READ_TIMEOUT_SECS }
fn default_write_transport_timeout() -> u64 { defaults::WRITE_TRANSPORT_TIMEOUT_SECS }
fn default_write_confirm_timeout() -> u64 { defaults::WRITE_CONFIRM_TIMEOUT_SECS }

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            login: String::new(),
            password: String::new(),
            read_timeout_secs: default_read_timeout(),
            write_transport_timeout_secs: default_write_transport_timeout(),
            write_confirm_timeout_secs: default_write_confirm_timeout(),
        }
    }
}

/// Poll cadence, debounce and recovery thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_active_interval_ms")]
    pub active_interval_ms: u64,
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
    #[serde(default = "default_active_window_start")]
    pub active_window_start_secs: u64,
    #[serde(default = "default_active_window_end")]
    pub active_window_end_secs: u64,
    #[serde(default = "default_min_cycle")]
    pub min_cycle_secs: u64,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_max_fetch_errors")]
    pub max_fetch_errors: u32,
    #[serde(default = "default_max_missing_sync")]
    pub max_missing_sync: u32,
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_secs: u64,
    #[serde(default = "default_cycle_history_len")]
    pub cycle_history_len: usize,
}

fn default_active_interval_ms() -> u64 { defaults::ACTIVE_INTERVAL_MS }
fn default_idle_interval_secs() -> u64 { defaults::IDLE_INTERVAL_SECS }
fn default_active_window_start() -> u64 { defaults::ACTIVE_WINDOW_START_SECS }
fn default_active_window_end() -> u64 { defaults::ACTIVE_WINDOW_END_SECS }
fn default_min_cycle() -> u64 { defaults::MIN_CYCLE_SECS }
fn default_token_ttl() -> u64 { defaults::TOKEN_TTL_SECS }
fn default_max_fetch_errors() -> u32 { defaults::MAX_FETCH_ERRORS }
fn default_max_missing_sync() -> u32 { defaults::MAX_MISSING_SYNC }
fn default_error_cooldown() -> u64 { defaults::ERROR_COOLDOWN_SECS }
fn default_cycle_history_len() -> usize { defaults::CYCLE_HISTORY_LEN }

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_interval_ms: default_active_interval_ms(),
            idle_interval_secs: default_idle_interval_secs(),
            active_window_start_secs: default_active_window_start(),
            active_window_end_secs: default_active_window_end(),
            min_cycle_secs: default_min_cycle(),
            token_ttl_secs: default_token_ttl(),
            max_fetch_errors: default_max_fetch_errors(),
            max_missing_sync: default_max_missing_sync(),
            error_cooldown_secs: default_error_cooldown(),
            cycle_history_len: default_cycle_history_len(),
        }
    }
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_csv_file")]
    pub csv_file: String,
    #[serde(default = "default_device_config_file")]
    pub device_config_file: String,
}

fn default_data_dir() -> PathBuf { PathBuf::from(defaults::DATA_DIR) }
fn default_csv_file() -> String { defaults::CSV_FILE.to_string() }
fn default_device_config_file() -> String { defaults::DEVICE_CONFIG_FILE.to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            csv_file: default_csv_file(),
            device_config_file: default_device_config_file(),
        }
    }
}

/// Read-only dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub addr: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_table_rows")]
    pub table_rows: usize,
}

fn default_server_addr() -> String { defaults::SERVER_ADDR.to_string() }
fn default_true() -> bool { true }
fn default_table_rows() -> usize { defaults::DASHBOARD_TABLE_ROWS }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            enabled: true,
            table_rows: default_table_rows(),
        }
    }
}

// ============================================================================
// Derived policy
// ============================================================================

impl PollingConfig {
    /// Timing policy consumed by the scheduler, detector and token cache.
    pub fn policy(&self) -> crate::sync::PollPolicy {
        crate::sync::PollPolicy {
            active_interval: Duration::from_millis(self.active_interval_ms),
            idle_interval: Duration::from_secs(self.idle_interval_secs),
            active_window_start: Duration::from_secs(self.active_window_start_secs),
            active_window_end: Duration::from_secs(self.active_window_end_secs),
            min_cycle: Duration::from_secs(self.min_cycle_secs),
            token_ttl: Duration::from_secs(self.token_ttl_secs),
            max_fetch_errors: self.max_fetch_errors,
            max_missing_sync: self.max_missing_sync,
            error_cooldown: Duration::from_secs(self.error_cooldown_secs),
            cycle_history_len: self.cycle_history_len,
        }
    }
}
