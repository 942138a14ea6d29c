//! Scan orchestration.
//!
//! Ties the walker, the fingerprint cache, the hasher and the registry
//! together. Every candidate file ends in exactly one of three states:
//! cache hit (skipped), stored, or failed. Failures are recorded and the
//! scan moves on; only problems with the scan root itself abort it.
//!
//! # Example
//!
//! ```no_run
//! use fileregistry::scan::{OrchestratorConfig, ScanOrchestrator};
//! use fileregistry::storage::{StorageBackends, StorageMode};
//! use fileregistry::cache::AttributeCache;
//! use fileregistry::scanner::HashAlgorithm;
//! use std::path::Path;
//!
//! let root = Path::new("/srv/archive");
//! let backends = StorageBackends::establish(
//!     StorageMode::Database,
//!     Path::new("/var/lib/fileregistry/registry.db"),
//!     root,
//!     AttributeCache::for_algorithm(HashAlgorithm::Md5),
//! )?;
//! let orchestrator = ScanOrchestrator::new(OrchestratorConfig::default(), backends);
//! let stats = orchestrator.scan(root)?;
//! println!("{}", stats);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod orchestrator;
pub mod stats;

use std::path::PathBuf;

use crate::error::ErrorKind;

pub use orchestrator::{OrchestratorConfig, ScanOrchestrator};
pub use stats::{FailureStage, FileFailure, FileOutcome, ScanStats};

/// Errors that stop a scan before any file is processed.
#[derive(thiserror::Error, Debug)]
pub enum OrchestratorError {
    /// The scan root does not exist.
    #[error("Scan root not found: {0}")]
    PathNotFound(PathBuf),

    /// The scan root is a file or something else that is not a directory.
    #[error("Scan root is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The scan root exists but cannot be resolved.
    #[error("Cannot resolve scan root {path}: {source}")]
    Root {
        /// The root as given
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The hashing pool could not be started.
    #[error("Failed to start hashing threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl OrchestratorError {
    /// Error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::IoFailure
    }
}
