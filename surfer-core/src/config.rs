use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SurferConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub sessions: SessionsConfig,
    pub orchestrator: OrchestratorConfig,
    pub store: StoreConfig,
    pub bridge: BridgeConfig,
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_min")]
    pub pool_min_connections: u32,

    #[serde(default = "default_pool_max")]
    pub pool_max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub pool_acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Upper bound on concurrently open sessions. `None` leaves it to host resources.
    #[serde(default)]
    pub max_sessions: Option<usize>,

    #[serde(default = "default_zoom_factor")]
    pub zoom_factor: f64,

    /// Version written into the `Chrome/<version>` user-agent token of every session.
    #[serde(default = "default_chrome_version")]
    pub pinned_chrome_version: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Minimum interval between paginated navigations inside a driver.
    #[serde(default = "default_min_pacing")]
    pub min_pacing_ms: u64,

    /// Delay between a session attaching and the first task starting.
    #[serde(default = "default_attach_settle")]
    pub attach_settle_ms: u64,

    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Substrings that identify a logged-out page for the snapshot driver.
    #[serde(default)]
    pub logged_out_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogConfig {
    /// A TOML platform catalog that replaces the built-in one.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_database_url() -> String {
    match get_data_dir() {
        Some(dir) => format!("sqlite://{}?mode=rwc", dir.join("runs.db").display()),
        None => "sqlite://surfer-runs.db?mode=rwc".to_string(),
    }
}

fn default_pool_min() -> u32 {
    1
}

fn default_pool_max() -> u32 {
    4
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_zoom_factor() -> f64 {
    0.8
}

fn default_chrome_version() -> String {
    "127.0.0.0".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_min_pacing() -> u64 {
    250
}

fn default_attach_settle() -> u64 {
    2000
}

fn default_export_dir() -> PathBuf {
    get_data_dir()
        .map(|d| d.join("exports"))
        .unwrap_or_else(|| PathBuf::from("exports"))
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    256
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_min_connections: default_pool_min(),
            pool_max_connections: default_pool_max(),
            pool_acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: None,
            zoom_factor: default_zoom_factor(),
            pinned_chrome_version: default_chrome_version(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_pacing_ms: default_min_pacing(),
            attach_settle_ms: default_attach_settle(),
            export_dir: default_export_dir(),
            logged_out_markers: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn min_pacing(&self) -> Duration {
        Duration::from_millis(self.min_pacing_ms)
    }

    pub fn attach_settle(&self) -> Duration {
        Duration::from_millis(self.attach_settle_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval(),
        }
    }
}

impl StoreConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

impl SurferConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SURFER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut surfer_config: SurferConfig = config.try_deserialize()?;

        if let Ok(url) = std::env::var("SURFER_DATABASE_URL") {
            surfer_config.database.url = url;
        }

        if let Ok(level) = std::env::var("SURFER_LOG_LEVEL") {
            surfer_config.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            surfer_config.logging.level = level;
        }

        surfer_config.validate()?;

        Ok(surfer_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.database.url.is_empty() {
            return Err(ConfigLoadError::MissingRequired("database.url".to_string()));
        }

        if !self.database.url.starts_with("sqlite:") {
            return Err(ConfigLoadError::InvalidValue {
                key: "database.url".to_string(),
                message: "Must be a SQLite URL starting with sqlite:".to_string(),
            });
        }

        if self.database.pool_min_connections > self.database.pool_max_connections {
            return Err(ConfigLoadError::InvalidValue {
                key: "database.pool_min_connections".to_string(),
                message: "Cannot be greater than pool_max_connections".to_string(),
            });
        }

        if self.sessions.max_sessions == Some(0) {
            return Err(ConfigLoadError::InvalidValue {
                key: "sessions.max_sessions".to_string(),
                message: "Must be greater than 0 when set".to_string(),
            });
        }

        if !(self.sessions.zoom_factor > 0.0 && self.sessions.zoom_factor <= 5.0) {
            return Err(ConfigLoadError::InvalidValue {
                key: "sessions.zoom_factor".to_string(),
                message: "Must be in (0, 5]".to_string(),
            });
        }

        let version_ok = !self.sessions.pinned_chrome_version.is_empty()
            && self
                .sessions
                .pinned_chrome_version
                .chars()
                .all(|c| c.is_ascii_digit() || c == '.');
        if !version_ok {
            return Err(ConfigLoadError::InvalidValue {
                key: "sessions.pinned_chrome_version".to_string(),
                message: "Must be a dotted numeric version such as 127.0.0.0".to_string(),
            });
        }

        if self.store.flush_interval_ms == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "store.flush_interval_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.bridge.event_capacity == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "bridge.event_capacity".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("surfer.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("surfer").join("config.toml"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".surfer").join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    for path in get_dotenv_paths() {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

fn get_dotenv_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
        paths.push(cwd.join(".env.local"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".surfer").join(".env"));
    }

    paths
}

pub fn get_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("surfer"))
}

pub fn ensure_data_dir() -> Result<PathBuf, std::io::Error> {
    let data_dir = get_data_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine data directory",
        )
    })?;

    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}
