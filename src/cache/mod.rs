//! Fingerprint caches.
//!
//! A cache answers one question for the scan loop: is there a trustworthy
//! digest for this file already, so hashing can be skipped?
//!
//! # Backends
//!
//! * [`attribute`]: a digest tag stored in an extended attribute on the file itself.
//! * [`lookup`]: the registry database, matched on path, size and modification time.
//! * [`layered`]: several backends consulted together (the `both` storage mode).
//!
//! Backends are chosen once at startup by [`crate::storage`]; the scan loop
//! only holds a `Box<dyn FingerprintCache>`.

pub mod attribute;
pub mod layered;
pub mod lookup;

use std::path::PathBuf;

use crate::error::ErrorKind;
use crate::registry::RegistryError;
use crate::scanner::{Digest, FileEntry};

pub use attribute::AttributeCache;
pub use layered::LayeredCache;
pub use lookup::RegistryCache;

/// Errors raised by a cache backend.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The filesystem does not support extended attributes.
    #[error("Extended attributes are not supported at {path}")]
    Unsupported {
        /// Path that was probed or written
        path: PathBuf,
    },

    /// Reading or writing an attribute failed.
    #[error("Attribute access failed for {path}: {source}")]
    Attribute {
        /// File the attribute belongs to
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The registry could not answer.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl CacheError {
    /// Error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported { .. } => ErrorKind::BackendUnavailable,
            Self::Attribute { .. } => ErrorKind::IoFailure,
            Self::Registry(e) => e.kind(),
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Answer from [`FingerprintCache::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A digest that still describes the file.
    Hit {
        /// The cached digest
        digest: Digest,
        /// Name of the backend that held it
        source: &'static str,
    },
    /// Nothing usable is stored for the file.
    Miss,
    /// A digest is stored, but the file changed since it was recorded or it
    /// was produced by another algorithm.
    Stale,
}

impl Lookup {
    /// The cached digest, if this is a hit.
    #[must_use]
    pub fn into_digest(self) -> Option<Digest> {
        match self {
            Self::Hit { digest, .. } => Some(digest),
            Self::Miss | Self::Stale => None,
        }
    }

    /// Whether a stored digest was found to be out of date.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }
}

/// A source of previously computed digests.
///
/// Implementations must be shareable across the hashing workers.
pub trait FingerprintCache: Send + Sync {
    /// Short backend name for logs and summaries.
    fn name(&self) -> &'static str;

    /// Look up a cached digest for `entry`.
    ///
    /// # Errors
    ///
    /// Only for failures of the backend itself; an unreadable or malformed
    /// tag is a miss, not an error.
    fn lookup(&self, entry: &FileEntry) -> CacheResult<Lookup>;

    /// Remember `digest` for `entry`.
    ///
    /// Returns `Ok(true)` if the digest was persisted by this backend and
    /// `Ok(false)` if the backend does not persist anything itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend tried to persist and failed.
    fn record(&self, entry: &FileEntry, digest: &Digest) -> CacheResult<bool>;
}
