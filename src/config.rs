use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while assembling the server configuration.
///
/// These are fatal at startup: the binary reports them and never binds.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read root dir: no root dir configured")]
    MissingRootDir,

    #[error("failed to read root dir: {0}")]
    RootDir(String),
}

/// Fileserver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind to, excluding the port
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory every request path is relative to
    #[serde(default)]
    pub root_dir: Option<PathBuf>,

    /// Log level name (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// File receiving a copy of every log line, in addition to stdout
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Disable the response cache
    #[serde(default)]
    pub no_cache: bool,

    /// Refuse to serve directories as zip data (and to accept zip uploads)
    #[serde(default)]
    pub no_dirs: bool,

    /// Maximum request body size for uploads (in bytes)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,
}

fn default_addr() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    9092
}

fn default_log_level() -> String {
    "DEBUG".to_string()
}

fn default_max_upload_size() -> usize {
    100 * 1024 * 1024 // 100 MB
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            port: default_port(),
            root_dir: None,
            log_level: default_log_level(),
            log_file: None,
            no_cache: false,
            no_dirs: false,
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// `addr:port` as handed to the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    pub fn cache_enabled(&self) -> bool {
        !self.no_cache
    }

    pub fn dirs_enabled(&self) -> bool {
        !self.no_dirs
    }

    /// Validate the configured root dir, creating it when absent.
    pub fn prepare_root_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = self.root_dir.as_deref().ok_or(ConfigError::MissingRootDir)?;
        prepare_root_dir(dir)
    }
}

/// Make sure `dir` exists and is a directory, returning its canonical path.
///
/// A missing directory is created together with its parents.
pub fn prepare_root_dir(dir: &Path) -> Result<PathBuf, ConfigError> {
    if dir.as_os_str().is_empty() {
        return Err(ConfigError::RootDir("root dir path is empty".to_string()));
    }

    match std::fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => {
            return Err(ConfigError::RootDir(format!(
                "root dir '{}' is not a directory",
                dir.display()
            )));
        }
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(dir).map_err(|err| {
                ConfigError::RootDir(format!("failed to create dir '{}': {}", dir.display(), err))
            })?;
        }
        Err(err) => {
            return Err(ConfigError::RootDir(format!("'{}': {}", dir.display(), err)));
        }
    }

    dir.canonicalize()
        .map_err(|err| ConfigError::RootDir(format!("'{}': {}", dir.display(), err)))
}
