//! The scan loop.
//!
//! # Pipeline
//!
//! 1. **Walk**: collect every candidate under the root (exclusions applied
//!    by the walker, traversal problems recorded as warnings).
//! 2. **Process**: in chunks of `commit_interval` files, on a pool of
//!    `io_threads` workers, each file is checked against the cache, hashed
//!    on a miss, and stored through the registry and the cache.
//! 3. **Commit**: the registry batch is committed after every chunk and
//!    once more at the end, including after an interruption.
//!
//! Outcomes are folded into [`ScanStats`] on the calling thread in walk
//! order, so counters and failure lists are deterministic.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use super::stats::{FailureStage, FileFailure, FileOutcome, ScanStats};
use super::OrchestratorError;
use crate::cache::{FingerprintCache, Lookup, RegistryCache};
use crate::error::ErrorKind;
use crate::progress::{ProgressCallback, PHASE_HASHING, PHASE_WALKING};
use crate::registry::{FileRecord, HostInfo, Registry, ScanLogEntry, UpsertOutcome};
use crate::scanner::path_utils::{display_path, is_representable};
use crate::scanner::{Digest, FileEntry, HashAlgorithm, Hasher, Walker, WalkerConfig};
use crate::storage::{StorageBackends, StorageMode};

/// Settings for a [`ScanOrchestrator`].
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Traversal settings
    pub walker: WalkerConfig,
    /// Digest algorithm
    pub algorithm: HashAlgorithm,
    /// Files processed between registry commits
    pub commit_interval: usize,
    /// Hashing threads
    pub io_threads: usize,
    /// Identity stamped on records and the scan log
    pub host: HostInfo,
    /// Shared Ctrl+C flag
    pub shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            walker: WalkerConfig::default(),
            algorithm: HashAlgorithm::default(),
            commit_interval: 100,
            io_threads: 4,
            host: HostInfo::detect(),
            shutdown_flag: None,
        }
    }
}

impl std::fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("walker", &self.walker)
            .field("algorithm", &self.algorithm)
            .field("commit_interval", &self.commit_interval)
            .field("io_threads", &self.io_threads)
            .field("host", &self.host.host_name)
            .field("shutdown_flag", &self.shutdown_flag.is_some())
            .finish()
    }
}

impl OrchestratorConfig {
    /// Set traversal settings.
    #[must_use]
    pub fn with_walker(mut self, walker: WalkerConfig) -> Self {
        self.walker = walker;
        self
    }

    /// Set the digest algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the commit interval (minimum 1).
    #[must_use]
    pub fn with_commit_interval(mut self, interval: usize) -> Self {
        self.commit_interval = interval.max(1);
        self
    }

    /// Set the number of hashing threads (minimum 1).
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Set the host identity.
    #[must_use]
    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    /// Attach a shutdown flag.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }
}

/// Drives a scan over one storage configuration.
pub struct ScanOrchestrator {
    config: OrchestratorConfig,
    cache: Box<dyn FingerprintCache>,
    registry: Option<Arc<Registry>>,
    storage: StorageMode,
    hasher: Hasher,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl ScanOrchestrator {
    /// Create an orchestrator over established backends.
    #[must_use]
    pub fn new(config: OrchestratorConfig, backends: StorageBackends) -> Self {
        Self::from_parts(config, backends.effective, backends.cache, backends.registry)
    }

    /// Create an orchestrator from individual parts.
    #[must_use]
    pub fn from_parts(
        config: OrchestratorConfig,
        storage: StorageMode,
        cache: Box<dyn FingerprintCache>,
        registry: Option<Arc<Registry>>,
    ) -> Self {
        let hasher = Hasher::new().with_algorithm(config.algorithm);
        Self {
            config,
            cache,
            registry,
            storage,
            hasher,
            progress: None,
        }
    }

    /// Report progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The registry sink, if any.
    #[must_use]
    pub fn registry(&self) -> Option<&Arc<Registry>> {
        self.registry.as_ref()
    }

    fn is_shutdown_requested(&self) -> bool {
        self.config
            .shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Scan everything under `root`.
    ///
    /// Per-file problems are counted in the returned stats. An interrupted
    /// scan still returns `Ok`, with [`ScanStats::interrupted`] set.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if the root is missing or not a
    /// directory, or if the worker pool cannot start.
    pub fn scan(&self, root: &Path) -> Result<ScanStats, OrchestratorError> {
        let started = Instant::now();
        let root = resolve_root(root)?;
        let mut stats = ScanStats::new(root.clone(), self.storage, self.config.algorithm);

        if let Some(registry) = &self.registry {
            let entry = ScanLogEntry::new(&root, &self.config.host);
            if let Err(e) = registry.append_scan_log(&entry) {
                log::warn!("Could not record scan in the history log: {}", e);
            }
        }
        log::info!(
            "Scanning {} ({} storage, {})",
            display_path(&root),
            self.storage,
            self.config.algorithm
        );

        let candidates = self.collect(&root, &mut stats);
        if stats.interrupted {
            self.commit(&mut stats);
        } else {
            self.scan_files(&candidates, &mut stats)?;
        }

        stats.elapsed_secs = started.elapsed().as_secs_f64();
        log::info!("{}", stats.counter_line());
        Ok(stats)
    }

    /// Walk phase: gather candidates and traversal counters.
    fn collect(&self, root: &Path, stats: &mut ScanStats) -> Vec<FileEntry> {
        let mut walker = Walker::new(root, self.config.walker.clone());
        if let Some(flag) = &self.config.shutdown_flag {
            walker = walker.with_shutdown_flag(Arc::clone(flag));
        }

        if let Some(progress) = &self.progress {
            progress.on_phase_start(PHASE_WALKING, 0);
        }
        let mut candidates = Vec::new();
        for item in walker.walk() {
            match item {
                Ok(entry) => {
                    if !is_representable(&entry.path) {
                        log::warn!(
                            "Path name is not plain UTF-8 text, shown escaped: {}",
                            display_path(&entry.path)
                        );
                    }
                    candidates.push(entry);
                    if let Some(progress) = &self.progress {
                        if let Some(last) = candidates.last() {
                            progress.on_progress(candidates.len(), &display_path(&last.path));
                        }
                    }
                }
                Err(e) => stats.record_walk_warning(&e),
            }
        }
        if let Some(progress) = &self.progress {
            progress.on_phase_end(PHASE_WALKING);
        }

        stats.excluded = walker.excluded_file_count() as u64;
        stats.folders = walker.dir_count() as u64;
        if self.is_shutdown_requested() {
            stats.interrupted = true;
        }
        log::debug!(
            "Walk found {} candidate(s) in {} folder(s), {} excluded by name",
            candidates.len(),
            stats.folders,
            stats.excluded
        );
        candidates
    }

    /// Process phase for an explicit list of files.
    ///
    /// Used by [`Self::scan`] after the walk; also callable directly with
    /// entries gathered elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ThreadPool`] if the pool cannot start.
    pub fn scan_files(
        &self,
        entries: &[FileEntry],
        stats: &mut ScanStats,
    ) -> Result<(), OrchestratorError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads.max(1))
            .thread_name(|i| format!("fileregistry-hash-{}", i))
            .build()?;

        if let Some(progress) = &self.progress {
            progress.on_phase_start(PHASE_HASHING, entries.len());
        }

        for chunk in entries.chunks(self.config.commit_interval.max(1)) {
            if self.is_shutdown_requested() {
                stats.interrupted = true;
                break;
            }

            let outcomes: Vec<FileOutcome> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|entry| {
                        if self.is_shutdown_requested() {
                            FileOutcome::Cancelled
                        } else {
                            self.process_entry(entry)
                        }
                    })
                    .collect()
            });

            for (entry, outcome) in chunk.iter().zip(outcomes) {
                if let (Some(progress), FileOutcome::Stored { bytes, .. }) =
                    (&self.progress, &outcome)
                {
                    progress.on_item_completed(*bytes);
                }
                stats.apply(outcome);
                if let Some(progress) = &self.progress {
                    progress.on_progress(stats.processed as usize, &display_path(&entry.path));
                }
            }

            self.commit(stats);
            if let Some(progress) = &self.progress {
                progress.on_message(&stats.counter_line());
            }
        }

        self.commit(stats);
        if let Some(progress) = &self.progress {
            progress.on_phase_end(PHASE_HASHING);
        }
        if stats.interrupted {
            log::warn!(
                "Scan interrupted after {} file(s); pending writes committed",
                stats.processed
            );
        }
        Ok(())
    }

    /// Commit the registry batch; a failure is counted, not fatal.
    fn commit(&self, stats: &mut ScanStats) {
        let Some(registry) = &self.registry else {
            return;
        };
        match registry.flush() {
            Ok(()) => log::debug!("Committed after {} file(s)", stats.processed),
            Err(e) => {
                log::error!("Registry commit failed: {}", e);
                stats.commit_failures += 1;
            }
        }
    }

    /// Cache check, hash, store.
    fn process_entry(&self, entry: &FileEntry) -> FileOutcome {
        match self.cache.lookup(entry) {
            Ok(Lookup::Hit { digest, source }) => {
                log::trace!("Cached by {}: {}", source, display_path(&entry.path));
                return self.adopt_cached(entry, digest, source);
            }
            Ok(Lookup::Stale) => {
                log::debug!("Changed since last scan: {}", display_path(&entry.path));
            }
            Ok(Lookup::Miss) => {}
            Err(e) => log::warn!(
                "Cache lookup failed for {}, hashing instead: {}",
                display_path(&entry.path),
                e
            ),
        }

        let digest = match self.hasher.hash(&entry.path) {
            Ok(digest) => digest,
            Err(e) => {
                log::warn!("Cannot hash {}: {}", display_path(&entry.path), e);
                return FileOutcome::Failed(FileFailure::from_hash_error(&e));
            }
        };

        let mut persisted = false;
        let mut registry_write = false;
        let mut problems = Vec::new();

        if let Some(registry) = &self.registry {
            let record = FileRecord::from_entry(entry, digest.clone(), &self.config.host.host_name)
                .with_algorithm(self.config.algorithm);
            match registry.upsert(&record) {
                Ok(outcome) => {
                    persisted = true;
                    registry_write = outcome.wrote();
                    if let UpsertOutcome::Updated {
                        previous: Some(previous),
                    } = &outcome
                    {
                        log::debug!(
                            "Content changed: {} ({} -> {})",
                            display_path(&entry.path),
                            previous,
                            digest
                        );
                    }
                }
                Err(e) => {
                    log::warn!("Registry write failed for {}: {}", display_path(&entry.path), e);
                    problems.push(e.to_string());
                }
            }
        }

        match self.cache.record(entry, &digest) {
            Ok(stored) => persisted |= stored,
            Err(e) => {
                log::warn!("Could not tag {}: {}", display_path(&entry.path), e);
                problems.push(e.to_string());
            }
        }

        if persisted {
            FileOutcome::Stored {
                bytes: entry.size,
                registry_write,
            }
        } else {
            let message = if problems.is_empty() {
                "no storage backend accepted the digest".to_string()
            } else {
                problems.join("; ")
            };
            FileOutcome::Failed(FileFailure::new(
                &entry.path,
                FailureStage::Store,
                ErrorKind::BackendUnavailable,
                message,
            ))
        }
    }

    /// A digest found outside the registry is copied into it without hashing.
    fn adopt_cached(&self, entry: &FileEntry, digest: Digest, source: &str) -> FileOutcome {
        let Some(registry) = self.registry.as_ref().filter(|_| source != RegistryCache::NAME)
        else {
            return FileOutcome::CacheHit {
                registry_write: false,
            };
        };
        let record = FileRecord::from_entry(entry, digest, &self.config.host.host_name)
            .with_algorithm(self.config.algorithm);
        let registry_write = match registry.upsert(&record) {
            Ok(outcome) => outcome.wrote(),
            Err(e) => {
                log::warn!(
                    "Could not copy cached checksum of {} into the registry: {}",
                    display_path(&entry.path),
                    e
                );
                false
            }
        };
        FileOutcome::CacheHit { registry_write }
    }
}

/// Check the root and make it absolute.
fn resolve_root(root: &Path) -> Result<std::path::PathBuf, OrchestratorError> {
    let metadata = std::fs::metadata(root).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => OrchestratorError::PathNotFound(root.to_path_buf()),
        _ => OrchestratorError::Root {
            path: root.to_path_buf(),
            source,
        },
    })?;
    if !metadata.is_dir() {
        return Err(OrchestratorError::NotADirectory(root.to_path_buf()));
    }
    root.canonicalize().map_err(|source| OrchestratorError::Root {
        path: root.to_path_buf(),
        source,
    })
}
