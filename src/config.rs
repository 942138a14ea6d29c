//! Application configuration management.
//!
//! Settings are layered with `figment`, later layers winning:
//!
//! 1. Built-in defaults
//! 2. TOML file (`<config dir>/fileregistry/config.toml` or `--config PATH`)
//! 3. Environment variables prefixed `FILEREGISTRY_` (e.g. `FILEREGISTRY_IO_THREADS=8`)
//! 4. Command-line flags, merged by [`Config::merge_scan_args`]
//!
//! A missing default file is not an error; a file that exists but does not
//! parse, or values that fail validation, are.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cache::attribute::default_attribute_name;
use crate::cli::ScanArgs;
use crate::error::ErrorKind;
use crate::scanner::{HashAlgorithm, WalkerConfig};
use crate::storage::StorageMode;

/// Directory names never descended into unless configured otherwise.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".gitold",
    ".snapshots",
    ".snapshot",
    "SNAPSHOTS",
    "snapshot",
];

/// File names never processed unless configured otherwise.
pub const DEFAULT_EXCLUDED_FILES: &[&str] = &[
    "._.DS_Store",
    ".DS_Store",
    ".localized",
    ".Spotlight-V100",
    ".Trashes",
    ".fseventsd",
    ".local",
    ".kde",
];

const ENV_PREFIX: &str = "FILEREGISTRY_";

/// Configuration errors. All of them are fatal at startup.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// An explicitly named config file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// The file or environment could not be parsed.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The platform configuration directory is unknown.
    #[error("Cannot determine the platform configuration directory")]
    NoProjectDirs,

    /// `init-config` refused to overwrite a file.
    #[error("Config file already exists: {0} (use --force to overwrite)")]
    AlreadyExists(PathBuf),

    /// Serialising the configuration failed.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Writing the configuration file failed.
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Target file
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Write { .. } => ErrorKind::IoFailure,
            _ => ErrorKind::ConfigMalformed,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory basenames pruned from every walk
    pub excluded_dirs: BTreeSet<String>,
    /// File basenames never processed
    pub excluded_files: BTreeSet<String>,
    /// Requested storage backend
    pub storage: StorageMode,
    /// Registry database file; platform data directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Digest algorithm
    pub algorithm: HashAlgorithm,
    /// Extended attribute name; `user.<algorithm>_checksum` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
    /// Files processed between registry commits
    pub commit_interval: usize,
    /// Hashing threads
    pub io_threads: usize,
    /// Follow symbolic links while walking
    pub follow_symlinks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| (*s).to_string()).collect(),
            excluded_files: DEFAULT_EXCLUDED_FILES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            storage: StorageMode::default(),
            database: None,
            algorithm: HashAlgorithm::default(),
            attribute_name: None,
            commit_interval: 100,
            io_threads: 4,
            follow_symlinks: false,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit file is missing, any layer
    /// fails to parse, or the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                Self::load_from_path(path)
            }
            None => match Self::default_path() {
                Ok(path) => Self::load_from_path(&path),
                Err(e) => {
                    log::debug!("{}; using defaults and environment only", e);
                    Self::extract(Self::figment())
                }
            },
        }
    }

    /// Load with `path` as the file layer. A missing file contributes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any layer fails to parse or validation fails.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        log::debug!("Loading configuration from {}", path.display());
        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default())).merge(Env::prefixed(ENV_PREFIX))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and exclusion names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.commit_interval == 0 {
            return Err(ConfigError::Invalid(
                "commit_interval must be at least 1".to_string(),
            ));
        }
        if self.io_threads == 0 {
            return Err(ConfigError::Invalid(
                "io_threads must be at least 1".to_string(),
            ));
        }
        for (field, names) in [
            ("excluded_dirs", &self.excluded_dirs),
            ("excluded_files", &self.excluded_files),
        ] {
            if let Some(bad) = names
                .iter()
                .find(|n| n.is_empty() || n.contains('/') || n.contains('\\'))
            {
                return Err(ConfigError::Invalid(format!(
                    "{} entries must be plain names, got '{}'",
                    field, bad
                )));
            }
        }
        if let Some(name) = &self.attribute_name {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "attribute_name must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Apply scan flags on top of the loaded layers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a flag value is out of range.
    pub fn merge_scan_args(&mut self, args: &ScanArgs) -> Result<(), ConfigError> {
        if let Some(storage) = args.storage {
            self.storage = storage;
        }
        if let Some(db) = &args.database.db {
            self.database = Some(db.clone());
        }
        if let Some(algorithm) = args.algorithm {
            self.algorithm = algorithm;
        }
        if let Some(threads) = args.io_threads {
            self.io_threads = threads;
        }
        if let Some(interval) = args.commit_interval {
            self.commit_interval = interval;
        }
        if let Some(follow) = args.follow_symlinks_override() {
            self.follow_symlinks = follow;
        }
        self.validate()
    }

    /// Effective attribute name for the configured algorithm.
    #[must_use]
    pub fn attribute_name(&self) -> String {
        self.attribute_name
            .clone()
            .unwrap_or_else(|| default_attribute_name(self.algorithm))
    }

    /// Effective registry path.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(default_database_path)
    }

    /// Walker settings derived from this configuration.
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig::default()
            .with_follow_symlinks(self.follow_symlinks)
            .with_excluded_dirs(self.excluded_dirs.iter().cloned())
            .with_excluded_files(self.excluded_files.iter().cloned())
    }

    /// Default platform-specific configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoProjectDirs`] if no home directory is known.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoProjectDirs)
    }

    /// Write this configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists and `overwrite` is false,
    /// or if serialising or writing fails.
    pub fn save_to_path(&self, path: &Path, overwrite: bool) -> Result<(), ConfigError> {
        if path.exists() && !overwrite {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(write_err)?;
        Ok(())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "fileregistry", "fileregistry")
}

/// `<platform data dir>/registry.db`, or `registry.db` in the working
/// directory when the platform directories are unknown.
#[must_use]
pub fn default_database_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("registry.db"))
        .unwrap_or_else(|| PathBuf::from("registry.db"))
}
