//! Directory walker implementation using jwalk.
//!
//! # Overview
//!
//! This module provides the [`Walker`] struct for traversing a directory tree
//! and collecting the metadata of every candidate file. Exclusions are
//! basename-based:
//!
//! - a directory whose name is in `excluded_dirs` is pruned from its parent's
//!   child list before descent, so nothing beneath it is ever read or counted
//! - a file whose name is in `excluded_files` is dropped from the output and
//!   tallied in [`Walker::excluded_file_count`]
//!
//! Unreadable directories and symlink cycles are yielded as [`ScanError`]
//! items and logged as warnings; the walk always continues.
//!
//! # Example
//!
//! ```no_run
//! use fileregistry::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let config = WalkerConfig::default().with_excluded_dirs([".git"]);
//! let walker = Walker::new(Path::new("/srv/archive"), config);
//! let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
//! println!("{} files, {} folders", files.len(), walker.dir_count());
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use jwalk::WalkDir;

use super::path_utils::display_path;
use super::{FileEntry, ScanError, WalkerConfig};

/// Directory walker for file discovery.
///
/// Each call to [`Walker::walk`] re-reads the tree, so the same walker can be
/// used for repeated scans. Children are sorted by name, which makes the
/// output order deterministic for a fixed tree.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
    /// Files dropped by name during the current walk
    excluded_files: AtomicUsize,
    /// Directories entered during the current walk (root excluded)
    dirs_seen: AtomicUsize,
    /// Warnings (unreadable subtrees, cycles) during the current walk
    warnings: AtomicUsize,
}

impl Walker {
    /// Create a new walker for the given path.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        Self {
            root: path.to_path_buf(),
            config,
            shutdown_flag: None,
            excluded_files: AtomicUsize::new(0),
            dirs_seen: AtomicUsize::new(0),
            warnings: AtomicUsize::new(0),
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker stops yielding entries.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Root of the walk.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files omitted by name during the most recent walk.
    #[must_use]
    pub fn excluded_file_count(&self) -> usize {
        self.excluded_files.load(Ordering::Relaxed)
    }

    /// Number of directories visited during the most recent walk.
    #[must_use]
    pub fn dir_count(&self) -> usize {
        self.dirs_seen.load(Ordering::Relaxed)
    }

    /// Number of warnings yielded during the most recent walk.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Check if shutdown has been requested.
    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn is_excluded_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.config.excluded_files.contains(n))
    }

    /// Walk the directory tree, yielding file entries.
    ///
    /// Returns an iterator over [`FileEntry`] results. Errors are yielded
    /// as [`ScanError`] values rather than stopping iteration. Counters
    /// exposed by the walker are reset at the start of every call.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileEntry, ScanError>> + '_ {
        self.excluded_files.store(0, Ordering::Relaxed);
        self.dirs_seen.store(0, Ordering::Relaxed);
        self.warnings.store(0, Ordering::Relaxed);

        let excluded_dirs: Arc<BTreeSet<String>> = Arc::new(self.config.excluded_dirs.clone());

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(false)
            .process_read_dir(move |_depth, _path, _read_dir_state, children| {
                // Prune excluded directories before jwalk schedules them for reading
                children.retain(|child| match child {
                    Ok(entry) => {
                        !(entry.file_type().is_dir()
                            && entry
                                .file_name()
                                .to_str()
                                .is_some_and(|name| excluded_dirs.contains(name)))
                    }
                    Err(_) => true,
                });

                // Sort children for deterministic output
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        walk_dir.into_iter().filter_map(move |entry_result| {
            if self.is_shutdown_requested() {
                log::debug!("Walker: Shutdown requested, stopping iteration");
                return None;
            }

            match entry_result {
                Ok(entry) => {
                    let path = entry.path();

                    // Skip the root directory itself
                    if path == self.root {
                        return None;
                    }

                    let file_type = entry.file_type();

                    if file_type.is_dir() {
                        self.dirs_seen.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }

                    if self.is_excluded_file(&path) {
                        log::trace!("Excluded by name: {}", display_path(&path));
                        self.excluded_files.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }

                    if file_type.is_symlink() && !self.config.follow_symlinks {
                        log::trace!("Skipping symlink: {}", display_path(&path));
                        return None;
                    }

                    let metadata = if self.config.follow_symlinks {
                        std::fs::metadata(&path)
                    } else {
                        std::fs::symlink_metadata(&path)
                    };

                    let metadata = match metadata {
                        Ok(m) => m,
                        Err(e) => return Some(self.handle_io_error(&path, e)),
                    };

                    // Sockets, fifos and devices are not catalogued
                    if !metadata.is_file() {
                        return None;
                    }

                    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    Some(Ok(FileEntry::new(path, metadata.len(), modified)))
                }
                Err(e) => Some(self.handle_jwalk_error(e)),
            }
        })
    }

    /// Handle I/O errors during file access.
    fn handle_io_error(&self, path: &Path, error: std::io::Error) -> Result<FileEntry, ScanError> {
        use std::io::ErrorKind;

        self.warnings.fetch_add(1, Ordering::Relaxed);
        match error.kind() {
            ErrorKind::PermissionDenied => {
                log::warn!("Permission denied: {}", display_path(path));
                Err(ScanError::PermissionDenied(path.to_path_buf()))
            }
            ErrorKind::NotFound => {
                log::debug!(
                    "File not found (may have been deleted): {}",
                    display_path(path)
                );
                Err(ScanError::NotFound(path.to_path_buf()))
            }
            _ => {
                log::warn!("I/O error for {}: {}", display_path(path), error);
                Err(ScanError::Io {
                    path: path.to_path_buf(),
                    source: error,
                })
            }
        }
    }

    /// Handle jwalk errors: unreadable directories and link cycles.
    fn handle_jwalk_error(&self, error: jwalk::Error) -> Result<FileEntry, ScanError> {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        let path = error
            .path()
            .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);

        if let Some(ancestor) = error.loop_ancestor() {
            log::warn!(
                "Skipping symlink cycle at {} (points back to {})",
                display_path(&path),
                display_path(ancestor)
            );
            return Err(ScanError::SymlinkCycle(path));
        }

        match error.io_error().map(std::io::Error::kind) {
            Some(std::io::ErrorKind::PermissionDenied) => {
                log::warn!("Skipping unreadable directory: {}", display_path(&path));
                Err(ScanError::PermissionDenied(path))
            }
            Some(std::io::ErrorKind::NotFound) => {
                log::warn!("Path vanished during walk: {}", display_path(&path));
                Err(ScanError::NotFound(path))
            }
            _ => {
                log::warn!("Walker error for {}: {}", display_path(&path), error);
                Err(ScanError::Io {
                    path,
                    source: std::io::Error::other(error.to_string()),
                })
            }
        }
    }
}
