//! fileregistry - filesystem content registry
//!
//! Walks a directory tree, fingerprints every file, and records path,
//! size, modification time and digest in a SQLite registry and/or an
//! extended attribute on each file. Rescans skip files whose cached
//! fingerprint is still current, and files sharing a digest are tracked as
//! duplicate groups that stay consistent as content changes.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod progress;
pub mod registry;
pub mod scan;
pub mod scanner;
pub mod signal;
pub mod storage;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cache::AttributeCache;
use crate::cli::{
    Cli, Commands, DatabaseArg, DupesArgs, FindArgs, HistoryArgs, InitConfigArgs, PruneArgs,
    ScanArgs, VerifyArgs,
};
use crate::config::Config;
use crate::error::ExitCode;
use crate::progress::Progress;
use crate::registry::{HostInfo, Registry};
use crate::scan::{OrchestratorConfig, OrchestratorError, ScanOrchestrator};
use crate::scanner::path_utils::display_path;
use crate::storage::{BackendError, StorageBackends};

/// Run the parsed command line, printing results to stdout.
///
/// # Errors
///
/// Returns an error for fatal conditions: malformed configuration, no usable
/// storage backend, a missing scan root. Per-file problems are reported
/// through the exit code instead.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(cli, &mut out)
}

/// [`run_app`] with an explicit output sink.
///
/// # Errors
///
/// See [`run_app`].
pub fn execute(cli: Cli, out: &mut dyn Write) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Scan(args) => run_scan(&args, config_path, cli.quiet, out),
        Commands::Find(args) => run_find(&args, config_path, out),
        Commands::Dupes(args) => run_dupes(&args, config_path, out),
        Commands::History(args) => run_history(&args, config_path, out),
        Commands::Prune(args) => run_prune(&args, config_path, out),
        Commands::Verify(args) => run_verify(&args, config_path, out),
        Commands::InitConfig(args) => run_init_config(&args, config_path, out),
    }
}

fn run_scan(
    args: &ScanArgs,
    config_path: Option<&Path>,
    quiet: bool,
    out: &mut dyn Write,
) -> Result<ExitCode> {
    let mut config = Config::load(config_path)?;
    config.merge_scan_args(args)?;
    log::debug!("Effective configuration: {:?}", config);

    // Checked before any backend is opened.
    if !args.path.exists() {
        return Err(OrchestratorError::PathNotFound(args.path.clone()).into());
    }
    if !args.path.is_dir() {
        return Err(OrchestratorError::NotADirectory(args.path.clone()).into());
    }

    let handler = signal::install_handler().context("installing Ctrl+C handler")?;

    let backends = StorageBackends::establish(
        config.storage,
        &config.database_path(),
        &args.path,
        AttributeCache::new(config.attribute_name()).with_algorithm(config.algorithm),
    )?;
    let registry = backends.registry.clone();

    let orchestrator_config = OrchestratorConfig {
        walker: config.walker_config(),
        algorithm: config.algorithm,
        commit_interval: config.commit_interval,
        io_threads: config.io_threads,
        host: HostInfo::detect(),
        shutdown_flag: Some(handler.get_flag()),
    };
    let mut orchestrator = ScanOrchestrator::new(orchestrator_config, backends);
    if !(quiet || args.no_progress || args.json) {
        orchestrator = orchestrator.with_progress(Arc::new(Progress::new(false)));
    }

    let stats = orchestrator.scan(&args.path)?;
    drop(orchestrator);

    if let Some(target) = &args.error_log {
        match stats.write_error_log(target) {
            Ok(path) => log::info!(
                "Wrote {} failure(s) to {}",
                stats.failures.len(),
                display_path(&path)
            ),
            Err(e) => log::error!("Could not write error log {}: {}", display_path(target), e),
        }
    }

    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
    } else if !quiet {
        writeln!(out, "{}", stats)?;
    }

    if let Some(registry) = registry {
        if let Ok(registry) = Arc::try_unwrap(registry) {
            registry.close()?;
        }
    }
    Ok(stats.exit_code())
}

/// Open an existing registry for the read/maintenance commands.
fn open_registry(database: &DatabaseArg, config_path: Option<&Path>) -> Result<Registry> {
    let path: PathBuf = match &database.db {
        Some(db) => db.clone(),
        None => Config::load(config_path)?.database_path(),
    };
    if !path.exists() {
        return Err(BackendError::NoBackend {
            reason: format!("no registry at {}", path.display()),
        }
        .into());
    }
    Ok(Registry::open(&path)?)
}

fn run_find(args: &FindArgs, config_path: Option<&Path>, out: &mut dyn Write) -> Result<ExitCode> {
    let registry = open_registry(&args.database, config_path)?;
    let records = registry.find_by_path_substring(&args.needle)?;
    for record in &records {
        let digest = record
            .digest
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        writeln!(out, "{}  {}", digest, display_path(&record.path))?;
    }
    log::info!("{} matching record(s)", records.len());
    Ok(ExitCode::Success)
}

fn run_dupes(args: &DupesArgs, config_path: Option<&Path>, out: &mut dyn Write) -> Result<ExitCode> {
    let registry = open_registry(&args.database, config_path)?;
    let groups = registry.duplicate_groups(args.min_members.max(2))?;

    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&groups)?)?;
        return Ok(ExitCode::Success);
    }
    for group in &groups {
        writeln!(out, "{} ({} copies)", group.digest, group.member_count)?;
        for member in &group.members {
            writeln!(out, "  {}", display_path(member))?;
        }
    }
    log::info!("{} duplicate group(s)", groups.len());
    Ok(ExitCode::Success)
}

fn run_history(
    args: &HistoryArgs,
    config_path: Option<&Path>,
    out: &mut dyn Write,
) -> Result<ExitCode> {
    let registry = open_registry(&args.database, config_path)?;
    for entry in registry.scan_logs(args.limit)? {
        writeln!(
            out,
            "{}  {}@{} ({})  {}",
            entry.issued_at.to_rfc3339(),
            entry.user_name,
            entry.host_name,
            entry.host_ip.as_deref().unwrap_or("-"),
            entry.directory_path
        )?;
    }
    Ok(ExitCode::Success)
}

fn run_prune(args: &PruneArgs, config_path: Option<&Path>, out: &mut dyn Write) -> Result<ExitCode> {
    let registry = open_registry(&args.database, config_path)?;
    let report = registry.prune_missing(args.dry_run)?;
    for path in &report.missing {
        writeln!(out, "{}", display_path(path))?;
    }
    if args.dry_run {
        log::info!(
            "{} of {} record(s) point at missing files (dry run, nothing removed)",
            report.missing.len(),
            report.examined
        );
    } else {
        log::info!("Removed {} of {} record(s)", report.removed, report.examined);
    }
    registry.close()?;
    Ok(ExitCode::Success)
}

fn run_verify(args: &VerifyArgs, config_path: Option<&Path>, out: &mut dyn Write) -> Result<ExitCode> {
    let registry = open_registry(&args.database, config_path)?;
    let issues = registry.audit_duplicate_groups()?;
    for issue in &issues {
        writeln!(out, "{}", issue)?;
    }
    if issues.is_empty() {
        log::info!("Duplicate index is consistent");
        return Ok(ExitCode::Success);
    }
    if !args.repair {
        log::warn!("{} inconsistency(ies); rerun with --repair to rebuild", issues.len());
        return Ok(ExitCode::PartialSuccess);
    }

    let groups = registry.rebuild_duplicate_groups()?;
    log::info!("Rebuilt duplicate index: {} group(s)", groups);
    let remaining = registry.audit_duplicate_groups()?;
    registry.close()?;
    Ok(if remaining.is_empty() {
        ExitCode::Success
    } else {
        ExitCode::PartialSuccess
    })
}

fn run_init_config(
    args: &InitConfigArgs,
    config_path: Option<&Path>,
    out: &mut dyn Write,
) -> Result<ExitCode> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    Config::default().save_to_path(&path, args.force)?;
    writeln!(out, "Wrote {}", path.display())?;
    Ok(ExitCode::Success)
}
