//! Command-line interface definitions for fileregistry.
//!
//! This module defines all CLI arguments, subcommands, and options using the clap derive API.
//! Global options (verbosity, config file, error format) apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Catalogue a tree into the default registry
//! fileregistry scan /volume1/photos
//!
//! # Tag files with extended attributes instead of using the database
//! fileregistry scan /volume1/photos --storage xattr
//!
//! # List duplicate groups with at least three copies
//! fileregistry dupes --min-members 3
//!
//! # Search registered paths
//! fileregistry find holiday
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::scanner::HashAlgorithm;
use crate::storage::StorageMode;

/// Filesystem content registry.
///
/// Records a content fingerprint and metadata for every file under a tree,
/// skips unchanged files on rescans, and tracks which files share identical
/// content.
#[derive(Debug, Parser)]
#[command(name = "fileregistry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (default: platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print fatal errors as a JSON object on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fingerprint every file under a directory
    Scan(ScanArgs),
    /// List registered paths containing a substring
    Find(FindArgs),
    /// List duplicate groups
    Dupes(DupesArgs),
    /// Show the scan history
    History(HistoryArgs),
    /// Remove records for files that no longer exist
    Prune(PruneArgs),
    /// Check duplicate-group consistency
    Verify(VerifyArgs),
    /// Write a default configuration file
    InitConfig(InitConfigArgs),
}

/// Registry location shared by the query subcommands.
#[derive(Debug, Args, Clone, Default)]
pub struct DatabaseArg {
    /// Registry database file (default: from config)
    #[arg(long = "db", value_name = "PATH")]
    pub db: Option<PathBuf>,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args, Default)]
pub struct ScanArgs {
    /// Directory to scan
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Where to persist digests: database, attribute-store (xattr) or both
    #[arg(long, value_enum, value_name = "MODE")]
    pub storage: Option<StorageMode>,

    #[command(flatten)]
    pub database: DatabaseArg,

    /// Digest algorithm
    #[arg(long, value_enum, value_name = "ALG")]
    pub algorithm: Option<HashAlgorithm>,

    /// Number of hashing threads
    ///
    /// Lower values reduce disk thrashing on HDDs.
    #[arg(long, value_name = "N")]
    pub io_threads: Option<usize>,

    /// Files processed between registry commits
    #[arg(long, value_name = "N")]
    pub commit_interval: Option<usize>,

    /// Follow symbolic links during the scan
    #[arg(long, overrides_with = "no_follow_symlinks")]
    pub follow_symlinks: bool,

    /// Do not follow symbolic links (overrides config)
    #[arg(long, overrides_with = "follow_symlinks")]
    pub no_follow_symlinks: bool,

    /// Write per-file failures as JSON to this file (or directory)
    #[arg(long, value_name = "PATH")]
    pub error_log: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the find subcommand.
#[derive(Debug, Args)]
pub struct FindArgs {
    /// Text to look for in registered paths
    #[arg(value_name = "SUBSTRING")]
    pub needle: String,

    #[command(flatten)]
    pub database: DatabaseArg,
}

/// Arguments for the dupes subcommand.
#[derive(Debug, Args)]
pub struct DupesArgs {
    #[command(flatten)]
    pub database: DatabaseArg,

    /// Only show groups with at least this many members
    #[arg(long, value_name = "N", default_value = "2")]
    pub min_members: u64,

    /// Print groups as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the history subcommand.
#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[command(flatten)]
    pub database: DatabaseArg,

    /// Number of entries to show
    #[arg(long, value_name = "N", default_value = "20")]
    pub limit: usize,
}

/// Arguments for the prune subcommand.
#[derive(Debug, Args)]
pub struct PruneArgs {
    #[command(flatten)]
    pub database: DatabaseArg,

    /// Report what would be removed without deleting anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the verify subcommand.
#[derive(Debug, Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub database: DatabaseArg,

    /// Rebuild the duplicate index from the file records
    #[arg(long)]
    pub repair: bool,
}

/// Arguments for the init-config subcommand.
#[derive(Debug, Args)]
pub struct InitConfigArgs {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

impl ScanArgs {
    /// The symlink override given on the command line, if any.
    #[must_use]
    pub fn follow_symlinks_override(&self) -> Option<bool> {
        if self.follow_symlinks {
            Some(true)
        } else if self.no_follow_symlinks {
            Some(false)
        } else {
            None
        }
    }
}
