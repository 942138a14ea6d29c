//! Registry-backed fingerprint cache.

use std::sync::Arc;

use super::{CacheResult, FingerprintCache, Lookup};
use crate::registry::{unix_nanos, FileRecord, Registry};
use crate::scanner::path_utils::display_path;
use crate::scanner::{Digest, FileEntry, HashAlgorithm};

/// Trusts a registry record when its path, mtime and size still match the
/// file and its digest came from the configured algorithm.
///
/// `record` persists nothing here; the scan writes through
/// [`Registry::upsert`] instead.
#[derive(Debug, Clone)]
pub struct RegistryCache {
    registry: Arc<Registry>,
    algorithm: HashAlgorithm,
}

impl RegistryCache {
    /// Backend name reported in [`Lookup::Hit`].
    pub const NAME: &'static str = "database";

    /// Wrap a shared registry handle, expecting default-algorithm digests.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            algorithm: HashAlgorithm::default(),
        }
    }

    /// Expect digests produced by `algorithm`.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Rows written before the algorithm was stored are judged by width.
    fn same_algorithm(&self, record: &FileRecord, digest: &Digest) -> bool {
        match record.algorithm {
            Some(algorithm) => algorithm == self.algorithm,
            None => digest.as_bytes().len() == self.algorithm.digest_len(),
        }
    }
}

impl FingerprintCache for RegistryCache {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn lookup(&self, entry: &FileEntry) -> CacheResult<Lookup> {
        let Some(record) = self.registry.lookup_by_path(&entry.path)? else {
            return Ok(Lookup::Miss);
        };
        let Some(digest) = record.digest.clone() else {
            return Ok(Lookup::Miss);
        };
        if !self.same_algorithm(&record, &digest) {
            log::trace!(
                "Registry digest for {} is not {}",
                display_path(&entry.path),
                self.algorithm
            );
            return Ok(Lookup::Stale);
        }
        if record.modified_at != unix_nanos(entry.modified) || record.size != entry.size {
            log::trace!("Stale registry record for {}", display_path(&entry.path));
            return Ok(Lookup::Stale);
        }
        Ok(Lookup::Hit {
            digest,
            source: Self::NAME,
        })
    }

    fn record(&self, _entry: &FileEntry, _digest: &Digest) -> CacheResult<bool> {
        Ok(false)
    }
}
