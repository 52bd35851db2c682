//! Agent configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via WARBOT_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use warbot_client::{ConnectionConfig, HttpConfig};

/// Agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Endpoints and transport timeouts.
    pub network: NetworkConfig,
    /// Task scheduling.
    pub schedule: ScheduleConfig,
    /// In-game preferences.
    pub preferences: PreferencesConfig,
    /// Session persistence.
    pub storage: StorageConfig,
}

impl Config {
    /// Loads configuration from `path`, or from the file named by
    /// WARBOT_CONFIG, then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("WARBOT_CONFIG").ok().map(PathBuf::from));
        let config = match path {
            Some(path) => {
                let mut config = Self::from_file(&path)?;
                config.apply_env_overrides();
                config
            }
            None => Self::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.schedule.apply_env_overrides();
        self.preferences.apply_env_overrides();
        self.storage.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.schedule.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// `Origin` of the websocket handshake.
    pub game_origin: String,
    /// Base URL of the web client, scraped for the game version.
    pub web_origin: String,
    /// Servlet issuing sessions for a login token.
    pub server_list_url: String,
    pub connect_timeout_secs: u64,
    /// Transfer timeout of bootstrap requests.
    pub request_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            game_origin: "https://warh5.rivergame.net".to_string(),
            web_origin: "https://warh5.rivergame.net/webgame".to_string(),
            server_list_url: "https://serverlist-knight.rivergame.net/appServerListServlet"
                .to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            heartbeat_interval_secs: 10,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Settings for game connections.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new()
            .with_origin(self.game_origin.clone())
            .with_connect_timeout(self.connect_timeout())
            .with_heartbeat_interval(self.heartbeat_interval())
    }

    /// Settings for bootstrap requests.
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig::new().with_timeout(self.request_timeout())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(origin) = std::env::var("WARBOT_GAME_ORIGIN") {
            self.game_origin = origin;
        }
    }
}

/// Scheduling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Daily routine cadence, also the relogin interval when idle.
    pub run_interval_secs: u64,
    /// Idle time before an unused connection is closed.
    pub keep_alive_secs: u64,
    /// Look-ahead window for keeping the connection open.
    pub max_pending_secs: u64,
    /// Lead time for logging in ahead of scheduled work.
    pub reserved_login_secs: u64,
    /// Minimum delay before a relogin.
    pub min_retry_secs: u64,
    /// Tasks due within this window run early.
    pub tolerance_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_interval_secs: 60 * 60,
            keep_alive_secs: 10,
            max_pending_secs: 120,
            reserved_login_secs: 5,
            min_retry_secs: 120,
            tolerance_ms: 10,
        }
    }
}

impl ScheduleConfig {
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn max_pending(&self) -> Duration {
        Duration::from_secs(self.max_pending_secs)
    }

    pub fn reserved_login(&self) -> Duration {
        Duration::from_secs(self.reserved_login_secs)
    }

    pub fn min_retry(&self) -> Duration {
        Duration::from_secs(self.min_retry_secs)
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.run_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "run_interval_secs must be positive".to_string(),
            ));
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::ValidationError(
                "keep_alive_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secs) = std::env::var("WARBOT_RUN_INTERVAL") {
            if let Ok(parsed) = secs.parse() {
                self.run_interval_secs = parsed;
            }
        }
    }
}

/// In-game preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Wanted warzone (0 keeps the current one).
    pub warzone: i32,
    /// Alliance science to donate to first (0 for none).
    pub science_donate_prefer: i64,
    /// Donate coins to the coin science on Mondays.
    pub donate_coin_consume: bool,
    /// World-site kind to donate to first (0 for none).
    pub world_site_donate_prefer: i64,
}

impl PreferencesConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(warzone) = std::env::var("WARBOT_WARZONE") {
            if let Ok(parsed) = warzone.parse() {
                self.warzone = parsed;
            }
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the session record.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("WARBOT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
