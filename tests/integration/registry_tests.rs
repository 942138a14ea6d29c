use fileregistry::registry::{FileRecord, GroupInconsistency, Registry, UpsertOutcome};
use fileregistry::scanner::{Digest, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn digest(content: &str) -> Digest {
    Hasher::new().hash_bytes(content.as_bytes())
}

fn record(path: &str, content: &str, mtime: i64) -> FileRecord {
    FileRecord::new(
        PathBuf::from(path),
        digest(content),
        content.len() as u64,
        mtime,
        "host-a",
    )
}

#[test]
fn test_open_creates_parent_directories() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("registry.db");

    let registry = Registry::open(&path).unwrap();

    assert!(path.exists());
    assert_eq!(registry.location(), Some(path.as_path()));
    assert_eq!(registry.record_count().unwrap(), 0);
}

#[test]
fn test_open_fails_when_parent_is_a_file() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let err = Registry::open(&blocker.join("registry.db")).unwrap_err();
    assert_eq!(
        err.kind(),
        fileregistry::error::ErrorKind::BackendUnavailable
    );
}

#[test]
fn test_groups_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.db");
    {
        let registry = Registry::open(&path).unwrap();
        registry.upsert(&record("/srv/a", "dup", 1)).unwrap();
        registry.upsert(&record("/srv/b", "dup", 1)).unwrap();
        registry.upsert(&record("/srv/c", "solo", 1)).unwrap();
        registry.close().unwrap();
    }

    let registry = Registry::open(&path).unwrap();
    let groups = registry.duplicate_groups(2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(
        groups[0].members,
        vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]
    );
    assert!(registry.audit_duplicate_groups().unwrap().is_empty());
}

#[test]
fn test_change_sequence_keeps_counts_exact() {
    let registry = Registry::open_in_memory().unwrap();
    for name in ["/a", "/b", "/c"] {
        registry.upsert(&record(name, "d1", 1)).unwrap();
    }
    assert_eq!(registry.duplicate_groups(2).unwrap()[0].member_count, 3);

    let outcome = registry.upsert(&record("/c", "d2", 2)).unwrap();
    assert_eq!(
        outcome,
        UpsertOutcome::Updated {
            previous: Some(digest("d1"))
        }
    );
    let groups = registry.duplicate_groups(2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].digest, digest("d1"));
    assert_eq!(groups[0].member_count, 2);

    registry.upsert(&record("/b", "d2", 2)).unwrap();
    let groups = registry.duplicate_groups(2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].digest, digest("d2"));
    assert_eq!(
        registry.lookup_by_path(&PathBuf::from("/a")).unwrap().unwrap().duplicate_group,
        None
    );
    assert!(registry.audit_duplicate_groups().unwrap().is_empty());
}

#[test]
fn test_concurrent_upserts_same_digest() {
    let registry = Arc::new(Registry::open_in_memory().unwrap());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..25 {
                    let path = format!("/t{}/f{}", t, i);
                    registry.upsert(&record(&path, "shared", 1)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    registry.flush().unwrap();

    let groups = registry.duplicate_groups(2).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].member_count, 200);
    assert_eq!(groups[0].members.len(), 200);
    assert!(registry.audit_duplicate_groups().unwrap().is_empty());
}

#[test]
fn test_concurrent_moves_between_two_digests() {
    let registry = Arc::new(Registry::open_in_memory().unwrap());
    for i in 0..40 {
        registry
            .upsert(&record(&format!("/f{}", i), "left", 1))
            .unwrap();
    }

    // Half the files move to "right", from four threads at once.
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in (t * 5)..(t * 5 + 5) {
                    registry
                        .upsert(&record(&format!("/f{}", i), "right", 2))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let groups = registry.duplicate_groups(2).unwrap();
    let counts: Vec<_> = groups.iter().map(|g| g.member_count).collect();
    assert_eq!(counts, vec![20, 20]);
    assert!(registry.audit_duplicate_groups().unwrap().is_empty());
}

#[test]
fn test_rebuild_repairs_hand_damaged_index() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.db");
    {
        let registry = Registry::open(&path).unwrap();
        registry.upsert(&record("/x/1", "same", 1)).unwrap();
        registry.upsert(&record("/x/2", "same", 1)).unwrap();
        registry.close().unwrap();
    }
    {
        let conn = rusqlite_connection(&path);
        conn.execute("UPDATE duplicate_group SET member_count = 9", [])
            .unwrap();
    }

    let registry = Registry::open(&path).unwrap();
    let issues = registry.audit_duplicate_groups().unwrap();
    assert!(matches!(
        issues.as_slice(),
        [GroupInconsistency::CountMismatch {
            recorded: 9,
            actual: 2,
            ..
        }]
    ));

    assert_eq!(registry.rebuild_duplicate_groups().unwrap(), 1);
    assert!(registry.audit_duplicate_groups().unwrap().is_empty());
}

fn rusqlite_connection(path: &std::path::Path) -> rusqlite::Connection {
    rusqlite::Connection::open(path).unwrap()
}

#[test]
fn test_prune_dry_run_reports_without_deleting() {
    let dir = tempdir().unwrap();
    let kept = dir.path().join("kept.txt");
    std::fs::write(&kept, "k").unwrap();
    let registry = Registry::open_in_memory().unwrap();
    registry
        .upsert(&FileRecord::new(kept.clone(), digest("k"), 1, 1, "h"))
        .unwrap();
    registry
        .upsert(&FileRecord::new(
            dir.path().join("gone.txt"),
            digest("g"),
            1,
            1,
            "h",
        ))
        .unwrap();

    let report = registry.prune_missing(true).unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.missing, vec![dir.path().join("gone.txt")]);
    assert_eq!(report.removed, 0);
    assert_eq!(registry.record_count().unwrap(), 2);
}
