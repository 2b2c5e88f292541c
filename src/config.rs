//! Configuration management for dualshare
//!
//! Holds the settings for one sharing run and persists the last applied
//! settings to ~/.config/dualshare/config.toml so the next run (or a
//! boot-time restore) can pick them up again.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Application name for config directory
const APP_NAME: &str = "dualshare";

/// Default FTP username
pub const DEFAULT_USERNAME: &str = "user";

/// Default FTP password
pub const DEFAULT_PASSWORD: &str = "pass";

/// Default FTP control port
pub const DEFAULT_FTP_PORT: u16 = 2121;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for one sharing run.
///
/// The same shape is written to disk as the persisted record.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// FTP username
    pub username: String,

    /// FTP password, stored in plain text
    pub password: String,

    /// Directory exposed by both services
    pub directory: PathBuf,

    /// FTP control port
    pub ftp_port: u16,

    /// HTTP port
    pub http_port: u16,

    /// Whether a boot entry should launch the servers at startup
    #[serde(default)]
    pub auto_start: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("username", &self.username)
            .field("password", &"********")
            .field("directory", &self.directory)
            .field("ftp_port", &self.ftp_port)
            .field("http_port", &self.http_port)
            .field("auto_start", &self.auto_start)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            ftp_port: DEFAULT_FTP_PORT,
            http_port: DEFAULT_HTTP_PORT,
            auto_start: false,
        }
    }
}

impl ServerConfig {
    /// Create a configuration sharing `directory` with default credentials and ports
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Set the FTP credential pair
    pub fn set_credentials(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.username = username.into();
        self.password = password.into();
    }

    /// Set the shared directory
    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = directory.into();
    }

    /// Set the FTP and HTTP ports
    pub fn set_ports(&mut self, ftp_port: u16, http_port: u16) {
        self.ftp_port = ftp_port;
        self.http_port = http_port;
    }

    /// Set the autostart flag
    pub fn set_auto_start(&mut self, auto_start: bool) {
        self.auto_start = auto_start;
    }
}

/// Durable store for the last applied [`ServerConfig`].
///
/// Persistence is advisory: a missing or corrupt record reads as "no
/// configuration" and never stops the servers from running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the fixed well-known location
    ///
    /// Returns ~/.config/dualshare/config.toml on Linux
    pub fn default_location() -> ConfigResult<Self> {
        Ok(Self::at(Self::default_path()?))
    }

    /// Store at an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the default config file path
    pub fn default_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Path of the record file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `config` as the current record, replacing any previous one
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self, config: &ServerConfig) -> ConfigResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let contents = toml::to_string_pretty(config)?;
        write_private(&self.path, &contents)?;
        debug!(path = %self.path.display(), "Saved configuration");
        Ok(())
    }

    /// Read the record, treating any failure as "no configuration"
    pub fn load(&self) -> Option<ServerConfig> {
        match self.try_load() {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable configuration");
                None
            }
        }
    }

    /// Read the record, reporting why it could not be read
    ///
    /// A missing file is `Ok(None)`.
    pub fn try_load(&self) -> ConfigResult<Option<ServerConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)?;
        let config: ServerConfig = toml::from_str(&contents)?;
        Ok(Some(config))
    }

    /// Remove the record if present
    pub fn clear(&self) -> ConfigResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `contents` readable by the owner only
///
/// A new file is created with mode 0600, an existing one is tightened first.
#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    if path.exists() {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    fs::write(path, contents)
}

/// Format the configuration for display
pub fn format_config(config: &ServerConfig) -> String {
    let lines = [
        "Current configuration:".to_string(),
        String::new(),
        format!("  username   = \"{}\"", config.username),
        "  password   = \"********\" (set)".to_string(),
        format!("  directory  = \"{}\"", config.directory.display()),
        format!("  ftp_port   = {}", config.ftp_port),
        format!("  http_port  = {}", config.http_port),
        format!("  auto_start = {}", config.auto_start),
    ];

    lines.join("\n")
}
