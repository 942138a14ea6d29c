//! Scan counters and per-file failure records.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ErrorKind, ExitCode};
use crate::scanner::path_utils::{display_path, sanitize_for_filename};
use crate::scanner::{HashAlgorithm, HashError, ScanError};
use crate::storage::StorageMode;

/// Where in the pipeline a file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Traversal (unreadable directory, link cycle)
    Walk,
    /// Reading the file content
    Hash,
    /// No sink accepted the digest
    Store,
}

/// One failure, as written to the error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    /// Path rendered safely for text output
    pub path: String,
    /// Pipeline stage
    pub stage: FailureStage,
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable cause
    pub message: String,
    /// When the failure happened
    pub timestamp: DateTime<Utc>,
}

impl FileFailure {
    /// Record a failure for `path` now.
    #[must_use]
    pub fn new(path: &Path, stage: FailureStage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: display_path(path).into_owned(),
            stage,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// A traversal warning.
    #[must_use]
    pub fn from_walk_error(err: &ScanError) -> Self {
        Self::new(err.path(), FailureStage::Walk, err.kind(), err.to_string())
    }

    /// A read failure.
    #[must_use]
    pub fn from_hash_error(err: &HashError) -> Self {
        Self::new(err.path(), FailureStage::Hash, err.kind(), err.to_string())
    }
}

/// Result of processing one candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// A cached digest was trusted; nothing was hashed.
    CacheHit {
        /// Whether the digest was copied into the registry
        registry_write: bool,
    },
    /// Hashed and persisted by at least one sink.
    Stored {
        /// Bytes read
        bytes: u64,
        /// Whether the registry was modified
        registry_write: bool,
    },
    /// Hashing or storing failed.
    Failed(FileFailure),
    /// Not processed because shutdown was requested.
    Cancelled,
}

/// Counters for one scan.
///
/// `processed == skipped + succeeded + errors` always holds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    /// Resolved scan root
    pub root: PathBuf,
    /// Storage mode in effect
    pub storage: StorageMode,
    /// Digest algorithm
    pub algorithm: HashAlgorithm,
    /// Candidate files examined
    pub processed: u64,
    /// Cache hits
    pub skipped: u64,
    /// Files hashed and stored
    pub succeeded: u64,
    /// Files that could not be hashed or stored
    pub errors: u64,
    /// Files omitted by name
    pub excluded: u64,
    /// Directories visited
    pub folders: u64,
    /// Subtrees skipped during traversal
    pub walk_warnings: u64,
    /// Registry rows inserted or changed
    pub registry_writes: u64,
    /// Batch commits that failed
    pub commit_failures: u64,
    /// Bytes read by the hasher
    pub bytes_hashed: u64,
    /// Wall-clock duration in seconds
    pub elapsed_secs: f64,
    /// The scan stopped early on Ctrl+C
    pub interrupted: bool,
    /// Every recorded failure, in processing order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FileFailure>,
}

impl ScanStats {
    /// Empty counters for a scan of `root`.
    #[must_use]
    pub fn new(root: PathBuf, storage: StorageMode, algorithm: HashAlgorithm) -> Self {
        Self {
            root,
            storage,
            algorithm,
            ..Self::default()
        }
    }

    /// Fold one file's outcome into the counters.
    pub fn apply(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::CacheHit { registry_write } => {
                self.processed += 1;
                self.skipped += 1;
                if registry_write {
                    self.registry_writes += 1;
                }
            }
            FileOutcome::Stored {
                bytes,
                registry_write,
            } => {
                self.processed += 1;
                self.succeeded += 1;
                self.bytes_hashed += bytes;
                if registry_write {
                    self.registry_writes += 1;
                }
            }
            FileOutcome::Failed(failure) => {
                self.processed += 1;
                self.errors += 1;
                self.failures.push(failure);
            }
            FileOutcome::Cancelled => self.interrupted = true,
        }
    }

    /// Record a traversal warning.
    pub fn record_walk_warning(&mut self, err: &ScanError) {
        self.walk_warnings += 1;
        self.failures.push(FileFailure::from_walk_error(err));
    }

    /// Single-line counters for the progress bar.
    #[must_use]
    pub fn counter_line(&self) -> String {
        format!(
            "processed {} | skipped {} | ok {} | errors {}",
            self.processed, self.skipped, self.succeeded, self.errors
        )
    }

    /// Whether anything went wrong.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.errors > 0 || self.walk_warnings > 0 || self.commit_failures > 0
    }

    /// Process exit code for this result.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.interrupted {
            ExitCode::Interrupted
        } else if self.has_failures() {
            ExitCode::PartialSuccess
        } else {
            ExitCode::Success
        }
    }

    /// Write the failures as JSON.
    ///
    /// If `target` is an existing directory the file is named
    /// `error_log_<root>.json` inside it. Returns the path written.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn write_error_log(&self, target: &Path) -> io::Result<PathBuf> {
        let path = if target.is_dir() {
            target.join(format!(
                "error_log_{}.json",
                sanitize_for_filename(&self.root.to_string_lossy())
            ))
        } else {
            target.to_path_buf()
        };
        let json = serde_json::to_string_pretty(&self.failures).map_err(io::Error::from)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heading = if self.interrupted {
            "Scan interrupted"
        } else {
            "Scan complete"
        };
        writeln!(f, "{}: {}", heading, display_path(&self.root))?;
        writeln!(f, "  Total files processed: {}", self.processed)?;
        writeln!(f, "  Skipped (already fingerprinted): {}", self.skipped)?;
        writeln!(f, "  Succeeded: {}", self.succeeded)?;
        writeln!(f, "  Errors: {}", self.errors)?;
        writeln!(f, "  Excluded by name: {}", self.excluded)?;
        writeln!(f, "  Folders: {}", self.folders)?;
        if self.walk_warnings > 0 {
            writeln!(f, "  Skipped subtrees: {}", self.walk_warnings)?;
        }
        if self.commit_failures > 0 {
            writeln!(f, "  Failed commits: {}", self.commit_failures)?;
        }
        writeln!(f, "  Hashed: {}", ByteSize::b(self.bytes_hashed))?;
        writeln!(f, "  Storage mode: {}", self.storage)?;
        write!(f, "  Algorithm: {} ({:.1}s)", self.algorithm, self.elapsed_secs)
    }
}
