//! Extended-attribute fingerprint cache.
//!
//! The digest is stored as lowercase hex text in a single user attribute on
//! each file, `user.<algorithm>_checksum` unless configured otherwise. The
//! tag travels with the file and needs no central database.
//!
//! Next to the tag a second attribute, `<name>.stamp`, holds the size and
//! modification time (`<bytes>:<unix nanos>`) the digest was computed for.
//! A tag whose stamp no longer matches the file is stale. Tags written by
//! other tools carry no stamp and are trusted as they are.

use std::path::Path;

use super::{CacheError, CacheResult, FingerprintCache, Lookup};
use crate::registry::unix_nanos;
use crate::scanner::path_utils::display_path;
use crate::scanner::{Digest, FileEntry, HashAlgorithm};

/// Fingerprint cache backed by an extended attribute on each file.
#[derive(Debug, Clone)]
pub struct AttributeCache {
    attribute: String,
    stamp: String,
    algorithm: HashAlgorithm,
}

impl AttributeCache {
    /// Backend name reported in [`Lookup::Hit`].
    pub const NAME: &'static str = "attribute-store";

    /// Use an explicit attribute name, expecting default-algorithm digests.
    #[must_use]
    pub fn new(attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        Self {
            stamp: format!("{}.stamp", attribute),
            attribute,
            algorithm: HashAlgorithm::default(),
        }
    }

    /// Use the conventional attribute name for `algorithm`.
    #[must_use]
    pub fn for_algorithm(algorithm: HashAlgorithm) -> Self {
        Self::new(default_attribute_name(algorithm)).with_algorithm(algorithm)
    }

    /// Expect digests produced by `algorithm`; tags of another width are ignored.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Attribute name this cache reads and writes.
    #[must_use]
    pub fn attribute_name(&self) -> &str {
        &self.attribute
    }

    /// Algorithm the stored digests are expected to come from.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Check that the filesystem holding `path` supports user attributes.
    ///
    /// Reads (never writes) the attribute on `path` itself, so probing a scan
    /// root leaves the tree untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unsupported`] when attributes cannot be used.
    pub fn probe(&self, path: &Path) -> CacheResult<()> {
        #[cfg(unix)]
        {
            if !xattr::SUPPORTED_PLATFORM {
                return Err(CacheError::Unsupported {
                    path: path.to_path_buf(),
                });
            }
            match xattr::get(path, &self.attribute) {
                Ok(_) => Ok(()),
                Err(e) => {
                    log::debug!(
                        "Attribute probe failed on {}: {}",
                        display_path(path),
                        e
                    );
                    Err(CacheError::Unsupported {
                        path: path.to_path_buf(),
                    })
                }
            }
        }
        #[cfg(not(unix))]
        {
            Err(CacheError::Unsupported {
                path: path.to_path_buf(),
            })
        }
    }
}

/// Conventional attribute name for an algorithm, e.g. `user.md5_checksum`.
#[must_use]
pub fn default_attribute_name(algorithm: HashAlgorithm) -> String {
    format!("user.{}_checksum", algorithm.name())
}

/// Decode a stored tag. Anything but hex of the expected width is treated as absent.
fn parse_tag(path: &Path, raw: &[u8], algorithm: HashAlgorithm) -> Option<Digest> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(_) => {
            log::debug!("Ignoring non-UTF-8 checksum tag on {}", display_path(path));
            return None;
        }
    };
    match Digest::from_hex(text.trim()) {
        Ok(digest) if digest.as_bytes().len() == algorithm.digest_len() => Some(digest),
        Ok(_) => {
            log::debug!(
                "Ignoring checksum tag on {}: not a {} digest",
                display_path(path),
                algorithm
            );
            None
        }
        Err(e) => {
            log::debug!("Ignoring malformed checksum tag on {}: {}", display_path(path), e);
            None
        }
    }
}

fn stamp_for(entry: &FileEntry) -> String {
    format!("{}:{}", entry.size, unix_nanos(entry.modified))
}

impl FingerprintCache for AttributeCache {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[cfg(unix)]
    fn lookup(&self, entry: &FileEntry) -> CacheResult<Lookup> {
        let raw = match xattr::get(&entry.path, &self.attribute) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(Lookup::Miss),
            Err(e) => {
                log::debug!(
                    "Cannot read checksum tag on {}: {}",
                    display_path(&entry.path),
                    e
                );
                return Ok(Lookup::Miss);
            }
        };
        let Some(digest) = parse_tag(&entry.path, &raw, self.algorithm) else {
            return Ok(Lookup::Miss);
        };

        match xattr::get(&entry.path, &self.stamp) {
            Ok(Some(stamp)) if stamp != stamp_for(entry).as_bytes() => {
                log::trace!("Stale checksum tag on {}", display_path(&entry.path));
                Ok(Lookup::Stale)
            }
            _ => Ok(Lookup::Hit {
                digest,
                source: Self::NAME,
            }),
        }
    }

    #[cfg(not(unix))]
    fn lookup(&self, _entry: &FileEntry) -> CacheResult<Lookup> {
        Ok(Lookup::Miss)
    }

    #[cfg(unix)]
    fn record(&self, entry: &FileEntry, digest: &Digest) -> CacheResult<bool> {
        xattr::set(&entry.path, &self.attribute, digest.to_hex().as_bytes()).map_err(
            |source| CacheError::Attribute {
                path: entry.path.clone(),
                source,
            },
        )?;
        if let Err(e) = xattr::set(&entry.path, &self.stamp, stamp_for(entry).as_bytes()) {
            log::debug!("Could not stamp {}: {}", display_path(&entry.path), e);
        }
        Ok(true)
    }

    #[cfg(not(unix))]
    fn record(&self, entry: &FileEntry, _digest: &Digest) -> CacheResult<bool> {
        Err(CacheError::Unsupported {
            path: entry.path.clone(),
        })
    }
}
