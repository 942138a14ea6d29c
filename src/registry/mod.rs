//! Persistent file registry and duplicate-group index.
//!
//! The registry keeps one [`FileRecord`] per path and derives a
//! [`DuplicateGroup`] for every digest shared by two or more records. Group
//! accounting is owned here: callers write records through
//! [`Registry::upsert`] and never touch group rows directly.
//!
//! # Example
//!
//! ```
//! use fileregistry::registry::{FileRecord, Registry, UpsertOutcome};
//! use fileregistry::scanner::Hasher;
//! use std::path::PathBuf;
//!
//! let registry = Registry::open_in_memory().unwrap();
//! let digest = Hasher::new().hash_bytes(b"same bytes");
//!
//! for name in ["/data/a.txt", "/data/b.txt"] {
//!     let record = FileRecord::new(PathBuf::from(name), digest.clone(), 10, 0, "host");
//!     assert_eq!(registry.upsert(&record).unwrap(), UpsertOutcome::Inserted);
//! }
//! registry.flush().unwrap();
//!
//! let groups = registry.duplicate_groups(2).unwrap();
//! assert_eq!(groups[0].member_count, 2);
//! ```

pub mod database;

use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ErrorKind;
use crate::scanner::{Digest, FileEntry, HashAlgorithm};

pub use database::Registry;

/// Errors raised by the registry.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    /// The database file could not be opened or initialised.
    #[error("Failed to open registry at {path}: {source}")]
    Open {
        /// Database location
        path: PathBuf,
        /// The underlying SQLite error
        #[source]
        source: rusqlite::Error,
    },

    /// The directory for the database could not be created.
    #[error("Failed to create registry directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A query or statement failed.
    #[error("Registry query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Another thread panicked while holding the connection.
    #[error("Registry connection lock poisoned")]
    Poisoned,
}

impl RegistryError {
    /// Error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BackendUnavailable
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// One registered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Absolute path, unique within the registry
    pub path: PathBuf,
    /// Content fingerprint; `None` only for rows written by foreign tools
    pub digest: Option<Digest>,
    /// Algorithm that produced `digest`; `None` for rows that predate it
    pub algorithm: Option<HashAlgorithm>,
    /// Size in bytes when scanned
    pub size: u64,
    /// Modification time when scanned, Unix nanoseconds
    pub modified_at: i64,
    /// Host that produced the record
    pub origin_host: String,
    /// When the record was last written
    pub scanned_at: DateTime<Utc>,
    /// Duplicate group the record belongs to, if any
    pub duplicate_group: Option<i64>,
}

impl FileRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(
        path: PathBuf,
        digest: Digest,
        size: u64,
        modified_at: i64,
        origin_host: impl Into<String>,
    ) -> Self {
        Self {
            path,
            digest: Some(digest),
            algorithm: None,
            size,
            modified_at,
            origin_host: origin_host.into(),
            scanned_at: Utc::now(),
            duplicate_group: None,
        }
    }

    /// Create a record from a walked file and its freshly computed digest.
    #[must_use]
    pub fn from_entry(entry: &FileEntry, digest: Digest, origin_host: impl Into<String>) -> Self {
        Self::new(
            entry.path.clone(),
            digest,
            entry.size,
            unix_nanos(entry.modified),
            origin_host,
        )
    }

    /// Note which algorithm produced the digest.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }
}

/// What [`Registry::upsert`] did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The path was new.
    Inserted,
    /// Same digest and metadata; nothing written.
    Unchanged,
    /// Same digest, refreshed size/mtime. Group membership untouched.
    Touched,
    /// The digest changed; `previous` is the digest the path held before.
    Updated {
        /// Former digest, if one was stored
        previous: Option<Digest>,
    },
}

impl UpsertOutcome {
    /// Whether the registry was modified.
    #[must_use]
    pub fn wrote(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// A set of records sharing one digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    /// Group id
    pub id: i64,
    /// Shared digest
    pub digest: Digest,
    /// Number of records holding the digest
    pub member_count: u64,
    /// Member paths, sorted
    pub members: Vec<PathBuf>,
}

/// Audit record for one scan invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanLogEntry {
    /// Row id, `None` until stored
    pub id: Option<i64>,
    /// Scanned directory
    pub directory_path: String,
    /// Host the scan ran on
    pub host_name: String,
    /// Host address, when it could be resolved
    pub host_ip: Option<String>,
    /// Invoking user
    pub user_name: String,
    /// When the scan was issued
    pub issued_at: DateTime<Utc>,
}

impl ScanLogEntry {
    /// Describe a scan of `directory` started now on `host`.
    #[must_use]
    pub fn new(directory: &Path, host: &HostInfo) -> Self {
        Self {
            id: None,
            directory_path: directory.to_string_lossy().into_owned(),
            host_name: host.host_name.clone(),
            host_ip: host.host_ip.clone(),
            user_name: host.user_name.clone(),
            issued_at: Utc::now(),
        }
    }
}

/// Result of [`Registry::prune_missing`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Records examined
    pub examined: u64,
    /// Paths that no longer exist on disk
    pub missing: Vec<PathBuf>,
    /// Records actually deleted (zero on a dry run)
    pub removed: u64,
}

/// A disagreement between the group table and the live records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum GroupInconsistency {
    /// A group row whose cached count differs from the live count.
    CountMismatch {
        /// Group digest
        digest: String,
        /// Stored member_count
        recorded: u64,
        /// Records currently holding the digest
        actual: u64,
    },
    /// A group row for a digest held by fewer than two records.
    SpuriousGroup {
        /// Group digest
        digest: String,
        /// Records currently holding the digest
        actual: u64,
    },
    /// A digest shared by several records with no group row.
    MissingGroup {
        /// Shared digest
        digest: String,
        /// Records holding the digest
        actual: u64,
    },
    /// A record whose group reference does not match its digest's group.
    MembershipMismatch {
        /// Offending record
        path: PathBuf,
    },
}

impl std::fmt::Display for GroupInconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CountMismatch {
                digest,
                recorded,
                actual,
            } => write!(
                f,
                "group {} records {} members but {} files hold it",
                digest, recorded, actual
            ),
            Self::SpuriousGroup { digest, actual } => {
                write!(f, "group {} exists with only {} member(s)", digest, actual)
            }
            Self::MissingGroup { digest, actual } => {
                write!(f, "digest {} is shared by {} files but has no group", digest, actual)
            }
            Self::MembershipMismatch { path } => {
                write!(f, "{} points at the wrong group", path.display())
            }
        }
    }
}

/// Identity of the machine and user running a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    /// Host name
    pub host_name: String,
    /// First address the host name resolves to
    pub host_ip: Option<String>,
    /// Login name of the invoking user
    pub user_name: String,
}

impl HostInfo {
    /// Gather host name, address and user from the running system.
    #[must_use]
    pub fn detect() -> Self {
        let host_name = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());
        let host_ip = resolve_address(&host_name);
        let user_name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            host_name,
            host_ip,
            user_name,
        }
    }
}

/// Resolve a host name, preferring IPv4 like the classic `gethostbyname`.
fn resolve_address(host_name: &str) -> Option<String> {
    let addrs: Vec<_> = (host_name, 0).to_socket_addrs().ok()?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip().to_string())
}

/// Convert a timestamp to signed Unix nanoseconds, saturating at the `i64` range.
#[must_use]
pub fn unix_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}
