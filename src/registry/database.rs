//! SQLite implementation of the registry.
//!
//! A single connection sits behind a mutex. Writes are batched: the first
//! write after a [`Registry::flush`] opens a transaction, and every
//! [`Registry::upsert`] runs inside its own savepoint within it, so the
//! record write and both group recounts become visible together or not at
//! all.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    DuplicateGroup, FileRecord, GroupInconsistency, PruneReport, RegistryError, RegistryResult,
    ScanLogEntry, UpsertOutcome,
};
use crate::scanner::path_utils::display_path;
use crate::scanner::{Digest, HashAlgorithm};

const RECORD_COLUMNS: &str =
    "path, digest, size, modified_at, origin_host, scanned_at, group_id, algorithm";

/// Persistent store of file records and duplicate groups.
pub struct Registry {
    conn: Mutex<Connection>,
    location: Option<PathBuf>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Open (or create) the registry database at `path`.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created or
    /// the schema cannot be initialised.
    pub fn open(path: &Path) -> RegistryResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RegistryError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let open_err = |source| RegistryError::Open {
            path: path.to_path_buf(),
            source,
        };
        let conn = Connection::open(path).map_err(open_err)?;
        configure(&conn, true).map_err(open_err)?;
        log::debug!("Opened registry at {}", display_path(path));

        Ok(Self {
            conn: Mutex::new(conn),
            location: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory registry.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot initialise the schema.
    pub fn open_in_memory() -> RegistryResult<Self> {
        let open_err = |source| RegistryError::Open {
            path: PathBuf::from(":memory:"),
            source,
        };
        let conn = Connection::open_in_memory().map_err(open_err)?;
        configure(&conn, false).map_err(open_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            location: None,
        })
    }

    /// Database file location, `None` for in-memory registries.
    #[must_use]
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    fn lock(&self) -> RegistryResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RegistryError::Poisoned)
    }

    /// Insert or update the record for `record.path`.
    ///
    /// Group accounting for the new digest and, on a change, the vacated
    /// digest is re-derived in the same savepoint as the record write.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the savepoint is rolled
    /// back and the registry is left as it was.
    pub fn upsert(&self, record: &FileRecord) -> RegistryResult<UpsertOutcome> {
        let mut conn = self.lock()?;
        begin_batch(&conn)?;

        let sp = conn.savepoint()?;
        let path = path_key(&record.path);
        let new_digest = record.digest.as_ref().map(Digest::to_hex);
        let algorithm = record.algorithm.map(HashAlgorithm::name);
        let size = to_sql_size(record.size);
        let scanned_at = record.scanned_at.to_rfc3339();

        let existing: Option<(Option<String>, i64, i64)> = sp
            .query_row(
                "SELECT digest, size, modified_at FROM file_record WHERE path = ?1",
                params![path],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                sp.execute(
                    "INSERT INTO file_record \
                     (path, digest, size, modified_at, origin_host, scanned_at, algorithm) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        path,
                        new_digest,
                        size,
                        record.modified_at,
                        record.origin_host,
                        scanned_at,
                        algorithm
                    ],
                )?;
                if let Some(hex) = &new_digest {
                    recount(&sp, hex)?;
                }
                UpsertOutcome::Inserted
            }
            Some((old_digest, old_size, old_mtime)) if old_digest == new_digest => {
                if old_size == size && old_mtime == record.modified_at {
                    UpsertOutcome::Unchanged
                } else {
                    sp.execute(
                        "UPDATE file_record SET size = ?2, modified_at = ?3, \
                         origin_host = ?4, scanned_at = ?5, \
                         algorithm = COALESCE(?6, algorithm) WHERE path = ?1",
                        params![
                            path,
                            size,
                            record.modified_at,
                            record.origin_host,
                            scanned_at,
                            algorithm
                        ],
                    )?;
                    UpsertOutcome::Touched
                }
            }
            Some((old_digest, _, _)) => {
                sp.execute(
                    "UPDATE file_record SET digest = ?2, size = ?3, modified_at = ?4, \
                     origin_host = ?5, scanned_at = ?6, algorithm = ?7 WHERE path = ?1",
                    params![
                        path,
                        new_digest,
                        size,
                        record.modified_at,
                        record.origin_host,
                        scanned_at,
                        algorithm
                    ],
                )?;
                if let Some(hex) = &new_digest {
                    recount(&sp, hex)?;
                }
                if let Some(hex) = &old_digest {
                    recount(&sp, hex)?;
                }
                UpsertOutcome::Updated {
                    previous: old_digest.and_then(|hex| Digest::from_hex(&hex).ok()),
                }
            }
        };

        sp.commit()?;
        Ok(outcome)
    }

    /// Re-derive group membership for one digest from the live records.
    ///
    /// Returns the number of records holding the digest.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub fn recount_duplicates(&self, digest: &Digest) -> RegistryResult<u64> {
        let mut conn = self.lock()?;
        begin_batch(&conn)?;
        let sp = conn.savepoint()?;
        let count = recount(&sp, &digest.to_hex())?;
        sp.commit()?;
        Ok(count)
    }

    /// Commit the pending batch, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; the batch stays open.
    pub fn flush(&self) -> RegistryResult<()> {
        let conn = self.lock()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
            log::debug!("Registry batch committed");
        }
        Ok(())
    }

    /// Flush and close the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the final commit fails.
    pub fn close(self) -> RegistryResult<()> {
        self.flush()
    }

    /// Fetch the record stored for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn lookup_by_path(&self, path: &Path) -> RegistryResult<Option<FileRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM file_record WHERE path = ?1", RECORD_COLUMNS);
        let record = conn
            .query_row(&sql, params![path_key(path)], record_from_row)
            .optional()?;
        Ok(record)
    }

    /// All paths currently holding `digest`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn lookup_by_digest(&self, digest: &Digest) -> RegistryResult<Vec<PathBuf>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path FROM file_record WHERE digest = ?1 ORDER BY path")?;
        let paths = stmt
            .query_map(params![digest.to_hex()], |row| {
                row.get::<_, String>(0).map(PathBuf::from)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    /// Records whose path contains `needle` (ASCII case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_by_path_substring(&self, needle: &str) -> RegistryResult<Vec<FileRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM file_record WHERE path LIKE ?1 ESCAPE '\\' ORDER BY path",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let pattern = format!("%{}%", escape_like(needle));
        let records = stmt
            .query_map(params![pattern], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Duplicate groups with at least `min_members` members, largest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn duplicate_groups(&self, min_members: u64) -> RegistryResult<Vec<DuplicateGroup>> {
        let conn = self.lock()?;
        let mut groups_stmt = conn.prepare(
            "SELECT id, digest, member_count FROM duplicate_group \
             WHERE member_count >= ?1 ORDER BY member_count DESC, digest",
        )?;
        let rows = groups_stmt
            .query_map(params![to_sql_size(min_members.max(2))], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    digest_column(row, 1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut members_stmt =
            conn.prepare("SELECT path FROM file_record WHERE group_id = ?1 ORDER BY path")?;
        let mut groups = Vec::with_capacity(rows.len());
        for (id, digest, member_count) in rows {
            let members = members_stmt
                .query_map(params![id], |row| row.get::<_, String>(0).map(PathBuf::from))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            groups.push(DuplicateGroup {
                id,
                digest,
                member_count: u64::try_from(member_count).unwrap_or(0),
                members,
            });
        }
        Ok(groups)
    }

    /// Append an audit entry. Returns its row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn append_scan_log(&self, entry: &ScanLogEntry) -> RegistryResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scan_log (directory_path, host_name, host_ip, user_name, issued_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.directory_path,
                entry.host_name,
                entry.host_ip,
                entry.user_name,
                entry.issued_at.to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The most recent `limit` audit entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn scan_logs(&self, limit: usize) -> RegistryResult<Vec<ScanLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, directory_path, host_name, host_ip, user_name, issued_at \
             FROM scan_log ORDER BY id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(ScanLogEntry {
                    id: Some(row.get(0)?),
                    directory_path: row.get(1)?,
                    host_name: row.get(2)?,
                    host_ip: row.get(3)?,
                    user_name: row.get(4)?,
                    issued_at: timestamp_column(row, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Number of file records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn record_count(&self) -> RegistryResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM file_record", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Remove records whose files no longer exist and fix up their groups.
    ///
    /// With `dry_run` the missing paths are reported but nothing is deleted.
    /// Paths whose existence cannot be determined are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if a query or delete fails.
    pub fn prune_missing(&self, dry_run: bool) -> RegistryResult<PruneReport> {
        let rows: Vec<(String, Option<String>)> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare("SELECT path, digest FROM file_record ORDER BY path")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut report = PruneReport {
            examined: rows.len() as u64,
            ..PruneReport::default()
        };
        // Stat outside the lock; this touches every registered path.
        let missing: Vec<(String, Option<String>)> = rows
            .into_iter()
            .filter(|(path, _)| matches!(Path::new(path).try_exists(), Ok(false)))
            .collect();
        report.missing = missing.iter().map(|(p, _)| PathBuf::from(p)).collect();

        if dry_run || missing.is_empty() {
            return Ok(report);
        }

        let mut conn = self.lock()?;
        begin_batch(&conn)?;
        let sp = conn.savepoint()?;
        let mut vacated = std::collections::BTreeSet::new();
        for (path, digest) in &missing {
            report.removed += sp.execute("DELETE FROM file_record WHERE path = ?1", params![path])?
                as u64;
            if let Some(hex) = digest {
                vacated.insert(hex.clone());
            }
        }
        for hex in &vacated {
            recount(&sp, hex)?;
        }
        sp.commit()?;
        drop(conn);
        self.flush()?;

        log::info!("Pruned {} missing file record(s)", report.removed);
        Ok(report)
    }

    /// Compare the group table against the live records.
    ///
    /// An empty result means every invariant holds.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn audit_duplicate_groups(&self) -> RegistryResult<Vec<GroupInconsistency>> {
        let conn = self.lock()?;
        let mut issues = Vec::new();

        let mut stmt = conn.prepare(
            "SELECT g.digest, g.member_count, \
                    (SELECT COUNT(*) FROM file_record f WHERE f.digest = g.digest) \
             FROM duplicate_group g ORDER BY g.digest",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (digest, recorded, actual) in rows {
            let actual = u64::try_from(actual).unwrap_or(0);
            if actual < 2 {
                issues.push(GroupInconsistency::SpuriousGroup { digest, actual });
            } else if u64::try_from(recorded).ok() != Some(actual) {
                issues.push(GroupInconsistency::CountMismatch {
                    digest,
                    recorded: u64::try_from(recorded).unwrap_or(0),
                    actual,
                });
            }
        }

        let mut stmt = conn.prepare(
            "SELECT f.digest, COUNT(*) FROM file_record f \
             WHERE f.digest IS NOT NULL \
               AND NOT EXISTS (SELECT 1 FROM duplicate_group g WHERE g.digest = f.digest) \
             GROUP BY f.digest HAVING COUNT(*) >= 2 ORDER BY f.digest",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        issues.extend(rows.into_iter().map(|(digest, actual)| {
            GroupInconsistency::MissingGroup {
                digest,
                actual: u64::try_from(actual).unwrap_or(0),
            }
        }));

        let mut stmt = conn.prepare(
            "SELECT f.path FROM file_record f \
             LEFT JOIN duplicate_group g ON g.digest = f.digest \
             WHERE (g.id IS NULL AND f.group_id IS NOT NULL) \
                OR (g.id IS NOT NULL AND (f.group_id IS NULL OR f.group_id != g.id)) \
             ORDER BY f.path",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        issues.extend(rows.into_iter().map(|path| GroupInconsistency::MembershipMismatch {
            path: PathBuf::from(path),
        }));

        Ok(issues)
    }

    /// Throw away the group table and derive it again from the records.
    ///
    /// Returns the number of groups after the rebuild.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub fn rebuild_duplicate_groups(&self) -> RegistryResult<u64> {
        let mut conn = self.lock()?;
        begin_batch(&conn)?;
        let sp = conn.savepoint()?;
        sp.execute_batch(
            "UPDATE file_record SET group_id = NULL WHERE group_id IS NOT NULL;
             DELETE FROM duplicate_group;
             INSERT INTO duplicate_group (digest, member_count)
                 SELECT digest, COUNT(*) FROM file_record
                 WHERE digest IS NOT NULL
                 GROUP BY digest HAVING COUNT(*) >= 2;
             UPDATE file_record SET group_id =
                 (SELECT g.id FROM duplicate_group g WHERE g.digest = file_record.digest)
             WHERE digest IS NOT NULL;",
        )?;
        let groups: i64 = sp.query_row("SELECT COUNT(*) FROM duplicate_group", [], |row| {
            row.get(0)
        })?;
        sp.commit()?;
        drop(conn);
        self.flush()?;

        log::info!("Rebuilt duplicate index: {} group(s)", groups);
        Ok(u64::try_from(groups).unwrap_or(0))
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let Ok(conn) = self.conn.get_mut() else {
            return;
        };
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("COMMIT") {
                log::error!("Failed to commit pending registry batch: {}", e);
            }
        }
    }
}

fn configure(conn: &Connection, on_disk: bool) -> rusqlite::Result<()> {
    if on_disk {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    conn.execute_batch(include_str!("schema.sql"))?;
    if version == 1 {
        conn.execute_batch("ALTER TABLE file_record ADD COLUMN algorithm TEXT;")?;
        log::info!("Upgraded registry schema to version 2");
    }
    Ok(())
}

/// Open the batch transaction if none is active.
fn begin_batch(conn: &Connection) -> rusqlite::Result<()> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN IMMEDIATE")?;
    }
    Ok(())
}

/// Re-derive the group row and memberships for one hex digest.
fn recount(conn: &Connection, hex: &str) -> rusqlite::Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM file_record WHERE digest = ?1",
        params![hex],
        |row| row.get(0),
    )?;

    if count >= 2 {
        conn.execute(
            "INSERT INTO duplicate_group (digest, member_count) VALUES (?1, ?2) \
             ON CONFLICT(digest) DO UPDATE SET member_count = excluded.member_count",
            params![hex, count],
        )?;
        let group_id: i64 = conn.query_row(
            "SELECT id FROM duplicate_group WHERE digest = ?1",
            params![hex],
            |row| row.get(0),
        )?;
        conn.execute(
            "UPDATE file_record SET group_id = ?2 \
             WHERE digest = ?1 AND (group_id IS NULL OR group_id != ?2)",
            params![hex, group_id],
        )?;
    } else {
        conn.execute(
            "UPDATE file_record SET group_id = NULL WHERE digest = ?1 AND group_id IS NOT NULL",
            params![hex],
        )?;
        conn.execute("DELETE FROM duplicate_group WHERE digest = ?1", params![hex])?;
    }

    Ok(u64::try_from(count).unwrap_or(0))
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn digest_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Digest> {
    let hex: String = row.get(idx)?;
    Digest::from_hex(&hex)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let digest = match row.get::<_, Option<String>>(1)? {
        Some(_) => Some(digest_column(row, 1)?),
        None => None,
    };
    Ok(FileRecord {
        path: PathBuf::from(row.get::<_, String>(0)?),
        digest,
        size: u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
        modified_at: row.get(3)?,
        origin_host: row.get(4)?,
        scanned_at: timestamp_column(row, 5)?,
        duplicate_group: row.get(6)?,
        algorithm: row
            .get::<_, Option<String>>(7)?
            .and_then(|name| name.parse().ok()),
    })
}
