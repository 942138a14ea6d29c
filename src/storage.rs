//! Storage backend selection.
//!
//! A scan can persist digests to the registry database, to an extended
//! attribute on each file, or to both. The requested mode is only a
//! preference: [`StorageBackends::establish`] opens what it can, falls back
//! to the other backend when one is unavailable, and fails only when
//! neither works.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{AttributeCache, FingerprintCache, LayeredCache, RegistryCache};
use crate::error::ErrorKind;
use crate::registry::Registry;
use crate::scanner::path_utils::display_path;

/// Where digests are persisted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// Registry database only.
    #[default]
    Database,
    /// Extended attribute on each file only.
    #[serde(alias = "xattr")]
    #[value(alias = "xattr")]
    AttributeStore,
    /// Both backends.
    Both,
}

impl StorageMode {
    /// Configuration name of the mode.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::AttributeStore => "attribute-store",
            Self::Both => "both",
        }
    }

    fn wants_registry(self) -> bool {
        matches!(self, Self::Database | Self::Both)
    }

    fn wants_attributes(self) -> bool {
        matches!(self, Self::AttributeStore | Self::Both)
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors establishing storage.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// Neither the registry nor the attribute store can be used.
    #[error("No usable storage backend: {reason}")]
    NoBackend {
        /// Why each backend was rejected
        reason: String,
    },
}

impl BackendError {
    /// Error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BackendUnavailable
    }
}

/// The backends a scan will actually use.
pub struct StorageBackends {
    /// Mode that was asked for
    pub requested: StorageMode,
    /// Mode in effect after fallback
    pub effective: StorageMode,
    /// Registry sink, present unless running attribute-store only
    pub registry: Option<Arc<Registry>>,
    /// Cache consulted before hashing and written after it
    pub cache: Box<dyn FingerprintCache>,
}

impl std::fmt::Debug for StorageBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBackends")
            .field("requested", &self.requested)
            .field("effective", &self.effective)
            .field("registry", &self.registry)
            .field("cache", &self.cache.name())
            .finish()
    }
}

impl StorageBackends {
    /// Open the backends for `mode`, falling back where needed.
    ///
    /// `probe_root` is the directory whose filesystem must support
    /// attributes, normally the scan root. The algorithm configured on
    /// `attributes` is the one both caches expect.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NoBackend`] when neither backend is usable.
    pub fn establish(
        mode: StorageMode,
        db_path: &Path,
        probe_root: &Path,
        attributes: AttributeCache,
    ) -> Result<Self, BackendError> {
        let mut failures = Vec::new();

        let open_registry = |failures: &mut Vec<String>| match Registry::open(db_path) {
            Ok(registry) => Some(Arc::new(registry)),
            Err(e) => {
                log::warn!("Registry unavailable: {}", e);
                failures.push(format!("database: {}", e));
                None
            }
        };
        let probe_attributes = |failures: &mut Vec<String>| match attributes.probe(probe_root) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Attribute store unavailable: {}", e);
                failures.push(format!("attribute-store: {}", e));
                false
            }
        };

        let mut registry = if mode.wants_registry() {
            open_registry(&mut failures)
        } else {
            None
        };
        let mut attributes_ok = mode.wants_attributes() && probe_attributes(&mut failures);

        match mode {
            StorageMode::Database if registry.is_none() => {
                attributes_ok = probe_attributes(&mut failures);
                if attributes_ok {
                    log::warn!("Falling back to attribute-store storage");
                }
            }
            StorageMode::AttributeStore if !attributes_ok => {
                registry = open_registry(&mut failures);
                if registry.is_some() {
                    log::warn!("Falling back to database storage");
                }
            }
            _ => {}
        }

        let effective = match (registry.is_some(), attributes_ok) {
            (true, true) => StorageMode::Both,
            (true, false) => StorageMode::Database,
            (false, true) => StorageMode::AttributeStore,
            (false, false) => {
                return Err(BackendError::NoBackend {
                    reason: failures.join("; "),
                })
            }
        };
        if mode == StorageMode::Both && effective != StorageMode::Both {
            log::warn!("Storage mode 'both' degraded to '{}'", effective);
        }

        let algorithm = attributes.algorithm();
        let registry_cache = |registry: &Arc<Registry>| {
            RegistryCache::new(Arc::clone(registry)).with_algorithm(algorithm)
        };
        let cache: Box<dyn FingerprintCache> = match (&registry, attributes_ok) {
            (Some(registry), true) => Box::new(LayeredCache::new(vec![
                Box::new(registry_cache(registry)),
                Box::new(attributes),
            ])),
            (Some(registry), false) => Box::new(registry_cache(registry)),
            (None, _) => Box::new(attributes),
        };

        log::info!(
            "Storage: {} (requested {}) for {}",
            effective,
            mode,
            display_path(probe_root)
        );

        Ok(Self {
            requested: mode,
            effective,
            registry,
            cache,
        })
    }
}
