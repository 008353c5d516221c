//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::infrastructure::image::{
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_MAX_STORE_SIZE, ImageLoaderConfig, MemoryCacheConfig,
};
use crate::infrastructure::image::memory_cache::{
    DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES, DEFAULT_SHARDS,
};
use crate::infrastructure::session::DEFAULT_AUTH_SCHEME;

use super::args::CliArgs;

pub(super) const APP_NAME: &str = "coverfetch";
pub(super) const APP_QUALIFIER: &str = "org";
pub(super) const APP_ORGANIZATION: &str = "coverfetch";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and CLI overrides.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache sizing and fetch limits.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Request signing.
    #[serde(default)]
    pub session: SessionConfig,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Strongly held images in memory.
    #[serde(default = "default_memory_entries")]
    pub memory_entries: usize,

    /// Decoded bytes held in memory.
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: u64,

    /// Memory cache shards.
    #[serde(default = "default_memory_shards")]
    pub memory_shards: usize,

    /// Thumbnail store size limit in bytes.
    #[serde(default = "default_store_bytes")]
    pub store_bytes: u64,

    /// Thumbnail store directory. Defaults to the platform cache dir.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// Consult and populate the thumbnail store.
    #[serde(default = "default_true")]
    pub use_local_store: bool,

    /// Concurrent downloads.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Registered fetches before new ones are refused.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Downscale images larger than this.
    #[serde(default)]
    pub max_dimension: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_entries: default_memory_entries(),
            memory_bytes: default_memory_bytes(),
            memory_shards: default_memory_shards(),
            store_bytes: default_store_bytes(),
            store_dir: None,
            use_local_store: true,
            max_concurrent_fetches: default_max_concurrent_fetches(),
            max_in_flight: default_max_in_flight(),
            timeout_secs: default_timeout_secs(),
            max_dimension: None,
        }
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Scheme placed before the token in the `Authorization` header.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,

    /// Collection account whose stored session is used.
    #[serde(default = "default_account")]
    pub account: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_scheme: default_auth_scheme(),
            account: default_account(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_memory_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_memory_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

fn default_memory_shards() -> usize {
    DEFAULT_SHARDS
}

fn default_store_bytes() -> u64 {
    DEFAULT_MAX_STORE_SIZE
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_auth_scheme() -> String {
    DEFAULT_AUTH_SCHEME.to_string()
}

fn default_account() -> String {
    "default".to_string()
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if args.no_local_store {
            self.cache.use_local_store = false;
        }
        if let Some(max_dimension) = args.max_dimension {
            self.cache.max_dimension = Some(max_dimension);
        }
        if let Some(timeout_secs) = args.timeout_secs {
            self.cache.timeout_secs = timeout_secs;
        }
        if let Some(max_concurrent_fetches) = args.max_concurrent_fetches {
            self.cache.max_concurrent_fetches = max_concurrent_fetches;
        }
        if let Some(account) = &args.account {
            self.session.account = account.clone();
        }
    }

    /// Builds the loader configuration from the `[cache]` section.
    #[must_use]
    pub fn loader_config(&self) -> ImageLoaderConfig {
        ImageLoaderConfig {
            memory: MemoryCacheConfig {
                max_entries: self.cache.memory_entries,
                max_bytes: self.cache.memory_bytes,
                shards: self.cache.memory_shards,
            },
            max_concurrent_fetches: self.cache.max_concurrent_fetches,
            max_in_flight: self.cache.max_in_flight,
            max_dimension: self.cache.max_dimension,
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default thumbnail store directory.
    #[must_use]
    pub fn default_store_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.cache_dir().join("thumbnails"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective thumbnail store directory.
    #[must_use]
    pub fn effective_store_dir(&self) -> Option<PathBuf> {
        self.cache.store_dir.clone().or_else(Self::default_store_dir)
    }
}
