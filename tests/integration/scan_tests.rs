use fileregistry::cache::RegistryCache;
use fileregistry::registry::{HostInfo, Registry};
use fileregistry::scan::{FailureStage, OrchestratorConfig, ScanOrchestrator, ScanStats};
use fileregistry::scanner::{HashAlgorithm, Hasher, WalkerConfig};
use fileregistry::storage::StorageMode;
use fileregistry::error::ExitCode;
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

fn host() -> HostInfo {
    HostInfo {
        host_name: "nas01".to_string(),
        host_ip: Some("192.0.2.10".to_string()),
        user_name: "archivist".to_string(),
    }
}

fn orchestrator(registry: &Arc<Registry>, walker: WalkerConfig) -> ScanOrchestrator {
    let config = OrchestratorConfig::default()
        .with_host(host())
        .with_walker(walker)
        .with_io_threads(2)
        .with_commit_interval(3);
    ScanOrchestrator::from_parts(
        config,
        StorageMode::Database,
        Box::new(RegistryCache::new(Arc::clone(registry))),
        Some(Arc::clone(registry)),
    )
}

fn default_walker() -> WalkerConfig {
    WalkerConfig::default()
        .with_excluded_dirs([".git", ".snapshots"])
        .with_excluded_files([".DS_Store"])
}

fn scan(registry: &Arc<Registry>, root: &Path) -> ScanStats {
    orchestrator(registry, default_walker()).scan(root).unwrap()
}

fn canonical(root: &Path, name: &str) -> PathBuf {
    root.canonicalize().unwrap().join(name)
}

#[test]
fn test_scan_empty_directory() {
    let dir = tempdir().unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());

    let stats = scan(&registry, dir.path());

    assert_eq!(stats.processed, 0);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.exit_code(), ExitCode::Success);
    assert_eq!(registry.record_count().unwrap(), 0);
}

#[test]
fn test_identical_files_form_one_group() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "X").unwrap();
    fs::write(dir.path().join("b.txt"), "X").unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());

    let stats = scan(&registry, dir.path());
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.succeeded, 2);

    let groups = registry.duplicate_groups(2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].member_count, 2);
    assert_eq!(groups[0].digest, Hasher::new().hash_bytes(b"X"));
    assert_eq!(
        groups[0].members,
        vec![canonical(dir.path(), "a.txt"), canonical(dir.path(), "b.txt")]
    );

    let a = registry
        .lookup_by_path(&canonical(dir.path(), "a.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(a.duplicate_group, Some(groups[0].id));
    assert_eq!(a.origin_host, "nas01");
}

#[test]
fn test_overwrite_dissolves_group() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    fs::write(&a, "X").unwrap();
    fs::write(&b, "X").unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());
    scan(&registry, dir.path());
    assert_eq!(registry.duplicate_groups(2).unwrap().len(), 1);

    fs::write(&b, "Y").unwrap();
    set_file_mtime(&b, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    let stats = scan(&registry, dir.path());

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.registry_writes, 1);
    assert!(registry.duplicate_groups(2).unwrap().is_empty());

    let hasher = Hasher::new();
    assert_eq!(
        registry.lookup_by_digest(&hasher.hash_bytes(b"X")).unwrap(),
        vec![canonical(dir.path(), "a.txt")]
    );
    let record = registry
        .lookup_by_path(&canonical(dir.path(), "b.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(record.digest, Some(hasher.hash_bytes(b"Y")));
    assert_eq!(record.duplicate_group, None);
    assert!(registry.audit_duplicate_groups().unwrap().is_empty());
}

#[test]
fn test_algorithm_switch_rehashes_unchanged_files() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "same").unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());
    scan(&registry, dir.path());

    fs::write(dir.path().join("b.txt"), "same").unwrap();
    let sha256 = OrchestratorConfig::default()
        .with_host(host())
        .with_walker(default_walker())
        .with_algorithm(HashAlgorithm::Sha256);
    let stats = ScanOrchestrator::from_parts(
        sha256,
        StorageMode::Database,
        Box::new(RegistryCache::new(Arc::clone(&registry)).with_algorithm(HashAlgorithm::Sha256)),
        Some(Arc::clone(&registry)),
    )
    .scan(dir.path())
    .unwrap();

    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.succeeded, 2);
    let groups = registry.duplicate_groups(2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(
        groups[0].digest,
        Hasher::new()
            .with_algorithm(HashAlgorithm::Sha256)
            .hash_bytes(b"same")
    );
    let a = registry
        .lookup_by_path(&canonical(dir.path(), "a.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(a.algorithm, Some(HashAlgorithm::Sha256));
    assert!(registry.audit_duplicate_groups().unwrap().is_empty());
}

#[test]
fn test_change_joins_existing_group() {
    let dir = tempdir().unwrap();
    let c = dir.path().join("c.txt");
    fs::write(dir.path().join("a.txt"), "shared").unwrap();
    fs::write(dir.path().join("b.txt"), "shared").unwrap();
    fs::write(&c, "other").unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());
    scan(&registry, dir.path());

    fs::write(&c, "shared").unwrap();
    set_file_mtime(&c, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
    scan(&registry, dir.path());

    let groups = registry.duplicate_groups(2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].member_count, 3);
    assert!(registry.audit_duplicate_groups().unwrap().is_empty());
}

#[test]
fn test_git_directories_never_traversed() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("project").join("sub");
    fs::create_dir_all(nested.join(".git").join("objects")).unwrap();
    fs::create_dir_all(dir.path().join(".git")).unwrap();
    fs::write(dir.path().join(".git").join("HEAD"), "ref").unwrap();
    fs::write(nested.join(".git").join("objects").join("pack"), "blob").unwrap();
    fs::write(nested.join("main.rs"), "fn main() {}").unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());

    let stats = scan(&registry, dir.path());

    assert_eq!(stats.processed, 1);
    // project, project/sub; nothing under either .git
    assert_eq!(stats.folders, 2);
    assert!(registry.find_by_path_substring(".git").unwrap().is_empty());
    assert_eq!(registry.record_count().unwrap(), 1);
}

#[test]
fn test_excluded_file_names_are_counted() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("photos")).unwrap();
    fs::write(dir.path().join(".DS_Store"), "meta").unwrap();
    fs::write(dir.path().join("photos").join(".DS_Store"), "meta").unwrap();
    fs::write(dir.path().join("photos").join("img.jpg"), "jpeg").unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());

    let stats = scan(&registry, dir.path());

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.excluded, 2);
    assert_eq!(stats.folders, 1);
}

#[test]
fn test_rescan_of_unchanged_tree_writes_nothing() {
    let dir = tempdir().unwrap();
    for i in 0..7 {
        fs::write(dir.path().join(format!("f{}.bin", i)), format!("content {}", i % 3)).unwrap();
    }
    let registry = Arc::new(Registry::open_in_memory().unwrap());

    let first = scan(&registry, dir.path());
    assert_eq!(first.registry_writes, 7);
    let groups_before = registry.duplicate_groups(2).unwrap();

    let second = scan(&registry, dir.path());
    assert_eq!(second.processed, 7);
    assert_eq!(second.skipped, 7);
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.registry_writes, 0);
    assert_eq!(second.bytes_hashed, 0);
    assert_eq!(registry.duplicate_groups(2).unwrap(), groups_before);
}

#[test]
fn test_touched_file_is_rehashed_without_group_change() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    fs::write(&a, "same").unwrap();
    fs::write(dir.path().join("b.txt"), "same").unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());
    scan(&registry, dir.path());

    set_file_mtime(&a, FileTime::from_unix_time(1_500_000_000, 0)).unwrap();
    let stats = scan(&registry, dir.path());

    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.registry_writes, 1);
    let groups = registry.duplicate_groups(2).unwrap();
    assert_eq!(groups[0].member_count, 2);
    let record = registry
        .lookup_by_path(&canonical(dir.path(), "a.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(record.modified_at, 1_500_000_000 * 1_000_000_000);
}

#[test]
fn test_deleted_files_are_kept_until_pruned() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    fs::write(&a, "dup").unwrap();
    fs::write(dir.path().join("b.txt"), "dup").unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());
    scan(&registry, dir.path());

    fs::remove_file(&a).unwrap();
    scan(&registry, dir.path());
    assert_eq!(registry.record_count().unwrap(), 2);

    let report = registry.prune_missing(false).unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(registry.record_count().unwrap(), 1);
    assert!(registry.duplicate_groups(2).unwrap().is_empty());
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_is_counted_and_scan_completes() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let locked = dir.path().join("locked.bin");
    fs::write(&locked, "secret").unwrap();
    fs::write(dir.path().join("open.bin"), "public").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::File::open(&locked).is_ok() {
        // Running with privileges that bypass permission bits.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
        return;
    }
    let registry = Arc::new(Registry::open_in_memory().unwrap());

    let stats = scan(&registry, dir.path());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failures.len(), 1);
    assert_eq!(stats.failures[0].stage, FailureStage::Hash);
    assert!(stats.failures[0].path.ends_with("locked.bin"));
    assert_eq!(stats.exit_code(), ExitCode::PartialSuccess);
    assert_eq!(registry.record_count().unwrap(), 1);
}

#[test]
fn test_error_log_written_for_failures() {
    let dir = tempdir().unwrap();
    let logs = tempdir().unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());
    let orchestrator = orchestrator(&registry, default_walker());
    let mut stats = ScanStats::new(
        dir.path().to_path_buf(),
        StorageMode::Database,
        Default::default(),
    );
    let vanished = fileregistry::scanner::FileEntry::new(
        dir.path().join("vanished.bin"),
        10,
        std::time::SystemTime::now(),
    );

    orchestrator.scan_files(&[vanished], &mut stats).unwrap();
    let written = stats.write_error_log(logs.path()).unwrap();

    let parsed: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(written).unwrap()).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
    assert_eq!(parsed[0]["kind"], "io_failure");
    assert!(parsed[0]["path"].as_str().unwrap().ends_with("vanished.bin"));
}

#[test]
fn test_scan_log_records_each_scan() {
    let dir = tempdir().unwrap();
    let registry = Arc::new(Registry::open_in_memory().unwrap());
    scan(&registry, dir.path());
    scan(&registry, dir.path());

    let logs = registry.scan_logs(10).unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].host_name, "nas01");
    assert_eq!(logs[0].user_name, "archivist");
    assert_eq!(logs[0].host_ip.as_deref(), Some("192.0.2.10"));
    assert_eq!(
        logs[0].directory_path,
        dir.path().canonicalize().unwrap().to_string_lossy()
    );
}

#[test]
fn test_single_thread_and_many_threads_agree() {
    let dir = tempdir().unwrap();
    for i in 0..20 {
        fs::write(dir.path().join(format!("{:02}.dat", i)), vec![(i % 4) as u8; 100]).unwrap();
    }

    let mut snapshots = Vec::new();
    for threads in [1, 8] {
        let registry = Arc::new(Registry::open_in_memory().unwrap());
        let config = OrchestratorConfig::default()
            .with_host(host())
            .with_io_threads(threads)
            .with_commit_interval(5);
        let orchestrator = ScanOrchestrator::from_parts(
            config,
            StorageMode::Database,
            Box::new(RegistryCache::new(Arc::clone(&registry))),
            Some(Arc::clone(&registry)),
        );
        let stats = orchestrator.scan(dir.path()).unwrap();
        assert_eq!(stats.succeeded, 20);
        let groups: Vec<_> = registry
            .duplicate_groups(2)
            .unwrap()
            .into_iter()
            .map(|g| (g.digest, g.member_count, g.members))
            .collect();
        snapshots.push(groups);
    }
    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(snapshots[0].len(), 4);
}
