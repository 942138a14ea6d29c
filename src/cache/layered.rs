//! Several fingerprint caches consulted as one.

use super::{CacheError, CacheResult, FingerprintCache, Lookup};
use crate::scanner::path_utils::display_path;
use crate::scanner::{Digest, FileEntry};

/// Combines backends for the `both` storage mode.
///
/// Layers are asked in order. The first hit wins, but a layer that reports
/// its digest as stale ends the search: the file changed, and an older tag
/// in a later layer must not be trusted over it. After a hit, every other
/// layer that lacks the digest is given a copy, so both sinks end up
/// holding it. `record` writes every layer and succeeds if at least one of
/// them persisted the digest.
pub struct LayeredCache {
    layers: Vec<Box<dyn FingerprintCache>>,
}

impl LayeredCache {
    /// Combine `layers`, consulted in the given order.
    #[must_use]
    pub fn new(layers: Vec<Box<dyn FingerprintCache>>) -> Self {
        Self { layers }
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether there are no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Copy a digest found in layer `found` into the layers that miss it.
    fn fill_others(&self, found: usize, entry: &FileEntry, digest: &Digest) {
        for (i, layer) in self.layers.iter().enumerate() {
            if i == found {
                continue;
            }
            let current = match layer.lookup(entry) {
                Ok(Lookup::Hit { digest: held, .. }) => held == *digest,
                _ => false,
            };
            if current {
                continue;
            }
            if let Err(e) = layer.record(entry, digest) {
                log::debug!(
                    "Could not copy checksum into {} for {}: {}",
                    layer.name(),
                    display_path(&entry.path),
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for LayeredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.layers.iter().map(|l| l.name()).collect();
        f.debug_struct("LayeredCache").field("layers", &names).finish()
    }
}

impl FingerprintCache for LayeredCache {
    fn name(&self) -> &'static str {
        "both"
    }

    fn lookup(&self, entry: &FileEntry) -> CacheResult<Lookup> {
        let mut answered = false;
        let mut first_error = None;
        for (i, layer) in self.layers.iter().enumerate() {
            match layer.lookup(entry) {
                Ok(Lookup::Hit { digest, source }) => {
                    self.fill_others(i, entry, &digest);
                    return Ok(Lookup::Hit { digest, source });
                }
                Ok(Lookup::Stale) => return Ok(Lookup::Stale),
                Ok(Lookup::Miss) => answered = true,
                Err(e) => {
                    log::debug!(
                        "{} lookup failed for {}: {}",
                        layer.name(),
                        display_path(&entry.path),
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if !answered => Err(e),
            _ => Ok(Lookup::Miss),
        }
    }

    fn record(&self, entry: &FileEntry, digest: &Digest) -> CacheResult<bool> {
        let mut persisted = false;
        let mut first_error: Option<CacheError> = None;
        for layer in &self.layers {
            match layer.record(entry, digest) {
                Ok(stored) => persisted |= stored,
                Err(e) => {
                    log::warn!(
                        "Could not store checksum via {} for {}: {}",
                        layer.name(),
                        display_path(&entry.path),
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match (persisted, first_error) {
            (true, _) => Ok(true),
            (false, Some(e)) => Err(e),
            (false, None) => Ok(false),
        }
    }
}
