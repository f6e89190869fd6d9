//! Configuration file support
//!
//! Settings are read from a TOML file and merged with command-line flags.
//! Precedence, highest first: CLI flag, config file, built-in default.
//!
//! # Search order
//!
//! 1. `--config <path>` (must exist)
//! 2. `./xml2xlsx.toml`
//! 3. `<user config dir>/xml2xlsx-server/config.toml`
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8000
//!
//! [storage]
//! work_dir = "/var/lib/xml2xlsx"
//! layout = "isolated"
//!
//! [converter]
//! program = "caex2xlsx"
//! args = ["{input}", "{output}"]
//! timeout_secs = 120
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::ServeArgs;
use crate::web::{
    ConverterConfig, CorsConfig, Layout, ServerConfig, DEFAULT_BIND, DEFAULT_CONVERTER_ARGS,
    DEFAULT_CONVERTER_PROGRAM, DEFAULT_CONVERTER_TIMEOUT, DEFAULT_PORT, DEFAULT_UPLOAD_LIMIT,
    DEFAULT_WORK_DIR,
};

/// Local config file name
pub const LOCAL_CONFIG_FILE: &str = "xml2xlsx.toml";

/// Directory under the user config dir
pub const APP_CONFIG_DIR: &str = "xml2xlsx-server";

/// Config loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// `[server]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
    /// Maximum upload size in MB
    pub upload_limit_mb: usize,
    /// Runtime worker threads (None = CPU count)
    pub workers: Option<usize>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            upload_limit_mb: DEFAULT_UPLOAD_LIMIT / (1024 * 1024),
            workers: None,
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub work_dir: PathBuf,
    pub layout: Layout,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            layout: Layout::default(),
        }
    }
}

/// `[converter]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterSection {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub verify_output: bool,
}

impl Default for ConverterSection {
    fn default() -> Self {
        Self {
            program: DEFAULT_CONVERTER_PROGRAM.to_string(),
            args: DEFAULT_CONVERTER_ARGS.iter().map(|a| a.to_string()).collect(),
            timeout_secs: DEFAULT_CONVERTER_TIMEOUT,
            verify_output: true,
        }
    }
}

/// `[cors]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSection {
    pub enabled: bool,
    /// None = any origin
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: None,
        }
    }
}

/// Contents of a config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub converter: ConverterSection,
    pub cors: CorsSection,
}

impl Config {
    /// Candidate config file locations, in search order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(APP_CONFIG_DIR).join("config.toml"));
        }
        paths
    }

    /// Load the first config file found in the default locations
    ///
    /// Returns the default config when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        for path in Self::search_paths() {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "loading config file");
                return Self::load_from_path(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load config from an explicit path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `explicit` when given, otherwise search default locations
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Parse config from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Merge with CLI overrides into a runtime server config
    pub fn merge_with_cli(&self, cli: &CliOverrides) -> Result<ServerConfig, ConfigError> {
        let upload_limit_mb = cli.upload_limit_mb.unwrap_or(self.server.upload_limit_mb);
        if upload_limit_mb == 0 {
            return Err(ConfigError::Invalid(
                "upload limit must be at least 1 MB".to_string(),
            ));
        }

        let program = cli
            .converter
            .clone()
            .unwrap_or_else(|| self.converter.program.clone());
        if program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "converter program must not be empty".to_string(),
            ));
        }

        let timeout_secs = cli.timeout_secs.unwrap_or(self.converter.timeout_secs);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "converter timeout must be at least 1 second".to_string(),
            ));
        }

        let workers = cli
            .workers
            .or(self.server.workers)
            .unwrap_or_else(num_cpus::get)
            .max(1);

        let cors = if !self.cors.enabled {
            CorsConfig::disabled()
        } else {
            match &self.cors.allowed_origins {
                Some(origins) => CorsConfig::strict(origins.clone()),
                None => CorsConfig::default(),
            }
        };

        Ok(ServerConfig {
            port: cli.port.unwrap_or(self.server.port),
            bind: cli.bind.clone().unwrap_or_else(|| self.server.bind.clone()),
            workers,
            upload_limit: upload_limit_mb * 1024 * 1024,
            work_dir: cli
                .work_dir
                .clone()
                .unwrap_or_else(|| self.storage.work_dir.clone()),
            layout: cli.layout.unwrap_or(self.storage.layout),
            converter: ConverterConfig {
                program,
                args: self.converter.args.clone(),
                timeout: Duration::from_secs(timeout_secs),
                verify_output: self.converter.verify_output && !cli.no_verify,
            },
            cors,
        })
    }
}

/// Values set explicitly on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub work_dir: Option<PathBuf>,
    pub converter: Option<String>,
    pub timeout_secs: Option<u64>,
    pub upload_limit_mb: Option<usize>,
    pub layout: Option<Layout>,
    pub workers: Option<usize>,
    pub no_verify: bool,
}

impl CliOverrides {
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<&ServeArgs> for CliOverrides {
    fn from(args: &ServeArgs) -> Self {
        Self {
            bind: args.bind.clone(),
            port: args.port,
            work_dir: args.work_dir.clone(),
            converter: args.converter.clone(),
            timeout_secs: args.timeout,
            upload_limit_mb: args.upload_limit,
            layout: args.layout,
            workers: args.workers,
            no_verify: args.no_verify,
        }
    }
}
