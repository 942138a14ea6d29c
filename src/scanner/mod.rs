//! Scanner module for directory traversal and file hashing.
//!
//! This module provides functionality for:
//! - Directory walking with directory-name and file-name exclusion sets
//! - Streaming content hashing with a selectable digest algorithm
//! - Safe rendering of path names for logs and error reports
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and file discovery
//! - [`hasher`]: Streaming file hashing
//! - [`path_utils`]: Lossy-but-safe path display and file-name sanitizing
//!
//! # Example
//!
//! ```no_run
//! use fileregistry::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let config = WalkerConfig::default()
//!     .with_excluded_dirs([".git"])
//!     .with_excluded_files([".DS_Store"]);
//!
//! let walker = Walker::new(Path::new("."), config);
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! println!("{} files excluded by name", walker.excluded_file_count());
//! ```

pub mod hasher;
pub mod path_utils;
pub mod walker;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::error::ErrorKind;

// Re-export main types
pub use hasher::{Digest, HashAlgorithm, Hasher, CHUNK_SIZE};
pub use walker::Walker;

/// Metadata for a discovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl FileEntry {
    /// Create a new FileEntry.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, modified: SystemTime) -> Self {
        Self {
            path,
            size,
            modified,
        }
    }

    /// Build an entry from the file's current metadata.
    ///
    /// # Errors
    ///
    /// Returns the metadata error when the file cannot be stat'ed.
    pub fn from_path(path: PathBuf) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(&path)?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Ok(Self::new(path, metadata.len(), modified))
    }
}

/// Configuration for directory walking.
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    /// Link cycles are reported as warnings and skipped.
    pub follow_symlinks: bool,

    /// Directory basenames that are never descended into.
    pub excluded_dirs: BTreeSet<String>,

    /// File basenames that are never yielded.
    pub excluded_files: BTreeSet<String>,
}

impl WalkerConfig {
    /// Set whether symbolic links are followed.
    #[must_use]
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Set the directory basenames to prune.
    #[must_use]
    pub fn with_excluded_dirs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_dirs = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the file basenames to omit.
    #[must_use]
    pub fn with_excluded_files<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_files = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Errors that can occur during directory scanning.
///
/// These never stop a walk; the walker yields them as items and moves on.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// A symbolic link points back into one of its own ancestors.
    #[error("Symlink cycle at {0}")]
    SymlinkCycle(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::PermissionDenied(p) | Self::NotFound(p) | Self::SymlinkCycle(p) => p,
            Self::Io { path, .. } => path,
        }
    }

    /// Error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::IoFailure
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found (vanished or broken link).
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    /// Classify an I/O error raised while reading `path`.
    #[must_use]
    pub fn from_io(path: &std::path::Path, source: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        match source.kind() {
            Io::NotFound => Self::NotFound(path.to_path_buf()),
            Io::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::NotFound(p) | Self::PermissionDenied(p) => p,
            Self::Io { path, .. } => path,
        }
    }

    /// Error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::IoFailure
    }
}
