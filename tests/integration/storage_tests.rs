use fileregistry::cache::AttributeCache;
use fileregistry::registry::{HostInfo, Registry};
use fileregistry::scan::{OrchestratorConfig, ScanOrchestrator, ScanStats};
use fileregistry::scanner::HashAlgorithm;
use fileregistry::storage::{StorageBackends, StorageMode};
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";
const WORLD_MD5: &str = "7d793037a0760186574b0282f2f435e7";

fn config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_host(HostInfo {
            host_name: "storage-host".to_string(),
            host_ip: None,
            user_name: "tester".to_string(),
        })
        .with_algorithm(HashAlgorithm::Md5)
        .with_io_threads(2)
}

fn attributes() -> AttributeCache {
    AttributeCache::new("user.fileregistry_storage_checksum")
}

fn establish(mode: StorageMode, db: &Path, root: &Path) -> StorageBackends {
    StorageBackends::establish(mode, db, root, attributes()).unwrap()
}

fn scan_in(mode: StorageMode, db: &Path, root: &Path) -> ScanStats {
    ScanOrchestrator::new(config(), establish(mode, db, root))
        .scan(root)
        .unwrap()
}

fn overwrite(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
    set_file_mtime(path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
}

fn stored_digest(db: &Path, path: &Path) -> Option<String> {
    Registry::open(db)
        .unwrap()
        .lookup_by_path(&path.canonicalize().unwrap())
        .unwrap()
        .and_then(|r| r.digest)
        .map(|d| d.to_hex())
}

#[test]
fn test_database_mode_end_to_end() {
    let data = tempdir().unwrap();
    let state = tempdir().unwrap();
    let db = state.path().join("reg").join("registry.db");
    fs::write(data.path().join("a"), "same").unwrap();
    fs::write(data.path().join("b"), "same").unwrap();

    let backends = establish(StorageMode::Database, &db, data.path());
    let stats = ScanOrchestrator::new(config(), backends)
        .scan(data.path())
        .unwrap();
    assert_eq!(stats.storage, StorageMode::Database);
    assert_eq!(stats.succeeded, 2);

    let registry = Registry::open(&db).unwrap();
    assert_eq!(registry.record_count().unwrap(), 2);
    assert_eq!(registry.duplicate_groups(2).unwrap().len(), 1);
}

#[test]
fn test_database_mode_rescan_and_change() {
    let data = tempdir().unwrap();
    let state = tempdir().unwrap();
    let db = state.path().join("registry.db");
    let b = data.path().join("b.txt");
    fs::write(data.path().join("a.txt"), "hello").unwrap();
    fs::write(&b, "hello").unwrap();
    scan_in(StorageMode::Database, &db, data.path());

    let again = scan_in(StorageMode::Database, &db, data.path());
    assert_eq!(again.skipped, 2);
    assert_eq!(again.registry_writes, 0);

    overwrite(&b, "world");
    let changed = scan_in(StorageMode::Database, &db, data.path());
    assert_eq!(changed.skipped, 1);
    assert_eq!(changed.succeeded, 1);
    assert_eq!(stored_digest(&db, &b).as_deref(), Some(WORLD_MD5));
    assert!(Registry::open(&db).unwrap().duplicate_groups(2).unwrap().is_empty());
}

#[test]
fn test_attribute_mode_detects_changed_file() {
    let data = tempdir().unwrap();
    if attributes().probe(data.path()).is_err() {
        return;
    }
    let state = tempdir().unwrap();
    let db = state.path().join("registry.db");
    let b = data.path().join("b.txt");
    fs::write(data.path().join("a.txt"), "hello").unwrap();
    fs::write(&b, "hello").unwrap();
    scan_in(StorageMode::AttributeStore, &db, data.path());

    overwrite(&b, "world");
    let changed = scan_in(StorageMode::AttributeStore, &db, data.path());
    assert_eq!(changed.skipped, 1);
    assert_eq!(changed.succeeded, 1);
    assert_eq!(xattr_value(&b).as_deref(), Some(WORLD_MD5));

    let settled = scan_in(StorageMode::AttributeStore, &db, data.path());
    assert_eq!(settled.skipped, 2);
    assert_eq!(settled.bytes_hashed, 0);
    assert!(!db.exists());
}

#[test]
fn test_both_mode_detects_changed_file() {
    let data = tempdir().unwrap();
    if attributes().probe(data.path()).is_err() {
        return;
    }
    let state = tempdir().unwrap();
    let db = state.path().join("registry.db");
    let b = data.path().join("b.txt");
    fs::write(data.path().join("a.txt"), "hello").unwrap();
    fs::write(&b, "hello").unwrap();
    scan_in(StorageMode::Both, &db, data.path());
    assert_eq!(Registry::open(&db).unwrap().duplicate_groups(2).unwrap().len(), 1);

    overwrite(&b, "world");
    let changed = scan_in(StorageMode::Both, &db, data.path());
    assert_eq!(changed.skipped, 1);
    assert_eq!(changed.succeeded, 1);
    assert_eq!(changed.registry_writes, 1);
    assert_eq!(stored_digest(&db, &b).as_deref(), Some(WORLD_MD5));
    assert_eq!(xattr_value(&b).as_deref(), Some(WORLD_MD5));

    let registry = Registry::open(&db).unwrap();
    assert!(registry.duplicate_groups(2).unwrap().is_empty());
    assert!(registry.audit_duplicate_groups().unwrap().is_empty());
    drop(registry);

    let settled = scan_in(StorageMode::Both, &db, data.path());
    assert_eq!(settled.skipped, 2);
    assert_eq!(settled.registry_writes, 0);
    assert_eq!(settled.bytes_hashed, 0);
}

#[test]
#[cfg(unix)]
fn test_both_mode_registers_files_tagged_elsewhere() {
    let data = tempdir().unwrap();
    if attributes().probe(data.path()).is_err() {
        return;
    }
    let state = tempdir().unwrap();
    let db = state.path().join("registry.db");
    for name in ["a.txt", "b.txt"] {
        let path = data.path().join(name);
        fs::write(&path, "hello").unwrap();
        xattr::set(&path, "user.fileregistry_storage_checksum", HELLO_MD5.as_bytes()).unwrap();
    }

    let stats = scan_in(StorageMode::Both, &db, data.path());
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.bytes_hashed, 0);
    assert_eq!(stats.registry_writes, 2);

    let registry = Registry::open(&db).unwrap();
    assert_eq!(registry.record_count().unwrap(), 2);
    assert_eq!(
        stored_digest(&db, &data.path().join("a.txt")).as_deref(),
        Some(HELLO_MD5)
    );
    let groups = registry.duplicate_groups(2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].member_count, 2);
}

#[test]
fn test_attribute_then_both_fills_registry() {
    let data = tempdir().unwrap();
    if attributes().probe(data.path()).is_err() {
        return;
    }
    let state = tempdir().unwrap();
    let db = state.path().join("registry.db");
    fs::write(data.path().join("one"), "1").unwrap();
    fs::write(data.path().join("two"), "2").unwrap();
    scan_in(StorageMode::AttributeStore, &db, data.path());
    assert!(!db.exists());

    let stats = scan_in(StorageMode::Both, &db, data.path());
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.registry_writes, 2);
    assert_eq!(Registry::open(&db).unwrap().record_count().unwrap(), 2);

    let settled = scan_in(StorageMode::Both, &db, data.path());
    assert_eq!(settled.skipped, 2);
    assert_eq!(settled.registry_writes, 0);
}

#[test]
fn test_attribute_mode_skips_on_rescan() {
    let data = tempdir().unwrap();
    if attributes().probe(data.path()).is_err() {
        return;
    }
    let state = tempdir().unwrap();
    let db = state.path().join("registry.db");
    fs::write(data.path().join("a"), "one").unwrap();
    fs::write(data.path().join("b"), "two").unwrap();

    let first = ScanOrchestrator::new(
        config(),
        establish(StorageMode::AttributeStore, &db, data.path()),
    )
    .scan(data.path())
    .unwrap();
    assert_eq!(first.storage, StorageMode::AttributeStore);
    assert_eq!(first.succeeded, 2);
    assert_eq!(first.registry_writes, 0);
    assert!(!db.exists());

    let second = ScanOrchestrator::new(
        config(),
        establish(StorageMode::AttributeStore, &db, data.path()),
    )
    .scan(data.path())
    .unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(second.bytes_hashed, 0);
}

#[test]
fn test_both_mode_writes_registry_and_tags() {
    let data = tempdir().unwrap();
    if attributes().probe(data.path()).is_err() {
        return;
    }
    let state = tempdir().unwrap();
    let db = state.path().join("registry.db");
    let file = data.path().join("a");
    fs::write(&file, "hello").unwrap();

    let stats = ScanOrchestrator::new(config(), establish(StorageMode::Both, &db, data.path()))
        .scan(data.path())
        .unwrap();
    assert_eq!(stats.storage, StorageMode::Both);
    assert_eq!(stats.registry_writes, 1);

    let tag = xattr_value(&file);
    assert_eq!(tag.as_deref(), Some(HELLO_MD5));
    assert_eq!(Registry::open(&db).unwrap().record_count().unwrap(), 1);
}

#[cfg(unix)]
fn xattr_value(path: &Path) -> Option<String> {
    xattr::get(path, "user.fileregistry_storage_checksum")
        .ok()
        .flatten()
        .and_then(|raw| String::from_utf8(raw).ok())
}

#[cfg(not(unix))]
fn xattr_value(_path: &Path) -> Option<String> {
    None
}

#[test]
fn test_missing_everything_is_backend_unavailable() {
    let state = tempdir().unwrap();
    let blocker = state.path().join("file");
    fs::write(&blocker, "x").unwrap();

    let err = StorageBackends::establish(
        StorageMode::Both,
        &blocker.join("registry.db"),
        &state.path().join("no-such-root"),
        attributes(),
    )
    .unwrap_err();
    assert_eq!(
        err.kind(),
        fileregistry::error::ErrorKind::BackendUnavailable
    );
}
