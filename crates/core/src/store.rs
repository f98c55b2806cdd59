//! Persistent state: file registry, content + embedding blobs, activity, and
//! co-occurrence counts. Sole authority for every persisted row.
//!
//! Backed by SQLite in WAL mode behind a bounded connection pool, so readers
//! proceed concurrently while writes serialize. Callers only ever see typed
//! operations; no query text crosses this module's boundary.

use chrono::{DateTime, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{ActivityRecord, FileRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    size INTEGER NOT NULL,
    mtime_ms INTEGER NOT NULL,
    mime TEXT,
    content_hash TEXT NOT NULL,
    scanned_at_ms INTEGER NOT NULL,
    tombstoned INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS contents (
    file_id INTEGER PRIMARY KEY REFERENCES files(id),
    snippet TEXT NOT NULL,
    embedding BLOB
);
CREATE TABLE IF NOT EXISTS activity (
    file_id INTEGER PRIMARY KEY REFERENCES files(id),
    first_seen_ms INTEGER NOT NULL,
    last_accessed_ms INTEGER NOT NULL,
    access_count INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS copairs (
    id_a INTEGER NOT NULL,
    id_b INTEGER NOT NULL,
    co_count INTEGER NOT NULL,
    PRIMARY KEY (id_a, id_b)
);
CREATE INDEX IF NOT EXISTS idx_activity_last ON activity(last_accessed_ms);
CREATE INDEX IF NOT EXISTS idx_copairs_b ON copairs(id_b);
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO meta (key, value) VALUES ('scan_epoch', 0);
INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', 1);
";

fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Encode an embedding as a little-endian f32 BLOB.
fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian f32 BLOB back into a vector.
fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        mtime: from_ms(row.get(3)?),
        mime: row.get(4)?,
        content_hash: row.get(5)?,
        scanned_at: from_ms(row.get(6)?),
        tombstoned: row.get::<_, i64>(7)? != 0,
    })
}

const FILE_COLS: &str = "id, path, size, mtime_ms, mime, content_hash, scanned_at_ms, tombstoned";

pub struct Store {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (or create) the database at `data_dir/filesense.db` with a pool
    /// of `pool_size` connections.
    pub fn open(data_dir: &Path, pool_size: u32) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Io(format!("create data dir {}: {e}", data_dir.display())))?;
        let db_path = data_dir.join("filesense.db");
        let manager = SqliteConnectionManager::file(&db_path).with_init(|c| {
            c.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| Error::Store(format!("open pool: {e}")))?;
        let store = Self { pool };
        store.pool.get()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // File registry
    // -----------------------------------------------------------------------

    /// Insert or update a file row. Returns `(id, changed)` where `changed`
    /// is true iff this call altered the stored hash or size (always true for
    /// a brand-new path). Re-registration clears any tombstone.
    pub fn upsert_file(
        &self,
        path: &str,
        size: u64,
        mtime: DateTime<Utc>,
        mime: Option<&str>,
        hash: &str,
    ) -> Result<(i64, bool)> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let existing: Option<(i64, i64, String)> = tx
            .query_row(
                "SELECT id, size, content_hash FROM files WHERE path = ?1",
                params![path],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let now_ms = to_ms(Utc::now());
        let result = match existing {
            Some((id, old_size, old_hash)) => {
                let changed = old_size as u64 != size || old_hash != hash;
                tx.execute(
                    "UPDATE files SET size = ?1, mtime_ms = ?2, mime = ?3, content_hash = ?4,
                            scanned_at_ms = ?5, tombstoned = 0
                     WHERE id = ?6",
                    params![size as i64, to_ms(mtime), mime, hash, now_ms, id],
                )?;
                (id, changed)
            }
            None => {
                tx.execute(
                    "INSERT INTO files (path, size, mtime_ms, mime, content_hash, scanned_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![path, size as i64, to_ms(mtime), mime, hash, now_ms],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };
        tx.commit()?;
        Ok(result)
    }

    pub fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {FILE_COLS} FROM files WHERE path = ?1"),
                params![path],
                row_to_file,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_file_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {FILE_COLS} FROM files WHERE id = ?1"),
                params![id],
                row_to_file,
            )
            .optional()?;
        Ok(row)
    }

    /// Every non-tombstoned file, ordered by id.
    pub fn list_live_files(&self) -> Result<Vec<FileRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {FILE_COLS} FROM files WHERE tombstoned = 0 ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_file)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Live `(id, path)` pairs whose path starts with `prefix`. Used by the
    /// scanner's tombstone sweep.
    pub fn live_files_under(&self, prefix: &str) -> Result<Vec<(i64, String)>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id, path FROM files WHERE tombstoned = 0")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().filter(|(_, p)| p.starts_with(prefix)).collect())
    }

    /// Mark a file dead: content and index membership go away, the id and all
    /// activity/co-occurrence history stay. Idempotent.
    pub fn tombstone(&self, id: i64) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE files SET tombstoned = 1 WHERE id = ?1", params![id])?;
        tx.execute("DELETE FROM contents WHERE file_id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    /// Replace the content row for a file atomically.
    pub fn put_content(&self, id: i64, snippet: &str, embedding: Option<&[f32]>) -> Result<()> {
        let conn = self.pool.get()?;
        let blob = embedding.map(encode_embedding);
        conn.execute(
            "INSERT INTO contents (file_id, snippet, embedding) VALUES (?1, ?2, ?3)
             ON CONFLICT(file_id) DO UPDATE SET
                snippet = excluded.snippet,
                embedding = excluded.embedding",
            params![id, snippet, blob],
        )?;
        Ok(())
    }

    /// Stored embedding for a file, if any.
    pub fn get_embedding(&self, id: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.pool.get()?;
        let blob: Option<Option<Vec<u8>>> = conn
            .query_row(
                "SELECT embedding FROM contents WHERE file_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(blob.flatten().map(|b| decode_embedding(&b)))
    }

    /// Stored snippet length for a file, if a content row exists.
    pub fn get_snippet(&self, id: i64) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let snippet = conn
            .query_row("SELECT snippet FROM contents WHERE file_id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(snippet)
    }

    /// Every live `(id, embedding)` pair, ordered by id. Index rebuild input.
    pub fn live_embeddings(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, c.embedding FROM files f
             JOIN contents c ON c.file_id = f.id
             WHERE f.tombstoned = 0 AND c.embedding IS NOT NULL
             ORDER BY f.id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                let id: i64 = r.get(0)?;
                let blob: Vec<u8> = r.get(1)?;
                Ok((id, decode_embedding(&blob)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `(live files, live embedded files)` for the health endpoint.
    pub fn counts(&self) -> Result<(usize, usize)> {
        let conn = self.pool.get()?;
        let files: i64 =
            conn.query_row("SELECT COUNT(*) FROM files WHERE tombstoned = 0", [], |r| r.get(0))?;
        let embedded: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files f JOIN contents c ON c.file_id = f.id
             WHERE f.tombstoned = 0 AND c.embedding IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        Ok((files as usize, embedded as usize))
    }

    // -----------------------------------------------------------------------
    // Activity
    // -----------------------------------------------------------------------

    /// Create-or-update the activity record for `id` at `now`. Returns the
    /// prior `last_accessed` (None for a fresh record) and the access count
    /// after the update. `last_accessed` is monotonic non-decreasing.
    pub fn record_access(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<(Option<DateTime<Utc>>, u32)> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let existing: Option<(i64, u32)> = tx
            .query_row(
                "SELECT last_accessed_ms, access_count FROM activity WHERE file_id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let result = match existing {
            Some((old_ms, count)) => {
                let new_ms = to_ms(now).max(old_ms);
                tx.execute(
                    "UPDATE activity SET last_accessed_ms = ?1, access_count = ?2
                     WHERE file_id = ?3",
                    params![new_ms, count + 1, id],
                )?;
                (Some(from_ms(old_ms)), count + 1)
            }
            None => {
                tx.execute(
                    "INSERT INTO activity (file_id, first_seen_ms, last_accessed_ms, access_count)
                     VALUES (?1, ?2, ?2, 1)",
                    params![id, to_ms(now)],
                )?;
                (None, 1)
            }
        };
        tx.commit()?;
        Ok(result)
    }

    pub fn get_activity(&self, id: i64) -> Result<Option<ActivityRecord>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT file_id, first_seen_ms, last_accessed_ms, access_count
                 FROM activity WHERE file_id = ?1",
                params![id],
                |r| {
                    Ok(ActivityRecord {
                        file_id: r.get(0)?,
                        first_seen: from_ms(r.get(1)?),
                        last_accessed: from_ms(r.get(2)?),
                        access_count: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// File ids other than `id` whose last access is at or after `since`.
    pub fn accessed_since(&self, id: i64, since: DateTime<Utc>) -> Result<Vec<i64>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT file_id FROM activity
             WHERE file_id != ?1 AND last_accessed_ms >= ?2
             ORDER BY file_id",
        )?;
        let ids = stmt
            .query_map(params![id, to_ms(since)], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Co-occurrence pairs
    // -----------------------------------------------------------------------

    /// Increment the undirected co-occurrence count for `(a, b)`, inserting
    /// at 1 on first occurrence. Order of arguments is irrelevant.
    pub fn bump_copair(&self, a: i64, b: i64) -> Result<()> {
        if a == b {
            return Err(Error::InvalidInput("co-pair ids must be distinct".into()));
        }
        let (lo, hi) = (a.min(b), a.max(b));
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO copairs (id_a, id_b, co_count) VALUES (?1, ?2, 1)
             ON CONFLICT(id_a, id_b) DO UPDATE SET co_count = co_count + 1",
            params![lo, hi],
        )?;
        Ok(())
    }

    /// Co-occurrence count for an unordered pair; 0 if absent.
    pub fn co_count(&self, a: i64, b: i64) -> Result<u32> {
        let (lo, hi) = (a.min(b), a.max(b));
        let conn = self.pool.get()?;
        let count: Option<u32> = conn
            .query_row(
                "SELECT co_count FROM copairs WHERE id_a = ?1 AND id_b = ?2",
                params![lo, hi],
                |r| r.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Every `(other_id, co_count)` paired with `id`.
    pub fn copartners(&self, id: i64) -> Result<Vec<(i64, u32)>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id_b, co_count FROM copairs WHERE id_a = ?1
             UNION ALL
             SELECT id_a, co_count FROM copairs WHERE id_b = ?1",
        )?;
        let rows = stmt
            .query_map(params![id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Scan epoch
    // -----------------------------------------------------------------------

    /// Monotonic counter bumped on any write that could invalidate the
    /// vector index.
    pub fn scan_epoch(&self) -> Result<u64> {
        let conn = self.pool.get()?;
        let v: i64 =
            conn.query_row("SELECT value FROM meta WHERE key = 'scan_epoch'", [], |r| r.get(0))?;
        Ok(v as u64)
    }

    pub fn bump_scan_epoch(&self) -> Result<u64> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE meta SET value = value + 1 WHERE key = 'scan_epoch'", [])?;
        let v: i64 =
            tx.query_row("SELECT value FROM meta WHERE key = 'scan_epoch'", [], |r| r.get(0))?;
        tx.commit()?;
        Ok(v as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), 2).unwrap();
        (dir, store)
    }

    #[test]
    fn upsert_reports_changed_only_on_hash_or_size_delta() {
        let (_dir, store) = store();
        let t = Utc::now();
        let (id, changed) = store.upsert_file("/a/x.txt", 10, t, None, "h1").unwrap();
        assert!(changed, "first registration counts as changed");

        let (id2, changed) = store.upsert_file("/a/x.txt", 10, t, None, "h1").unwrap();
        assert_eq!(id, id2);
        assert!(!changed, "identical hash and size must not report changed");

        let (_, changed) = store.upsert_file("/a/x.txt", 10, t, None, "h2").unwrap();
        assert!(changed, "hash delta must report changed");

        let (_, changed) = store.upsert_file("/a/x.txt", 11, t, None, "h2").unwrap();
        assert!(changed, "size delta must report changed");
    }

    #[test]
    fn ids_are_stable_across_tombstone_and_revival() {
        let (_dir, store) = store();
        let t = Utc::now();
        let (id, _) = store.upsert_file("/a/x.txt", 1, t, None, "h").unwrap();
        store.tombstone(id).unwrap();
        assert!(store.get_file_by_id(id).unwrap().unwrap().tombstoned);

        let (revived, _) = store.upsert_file("/a/x.txt", 1, t, None, "h").unwrap();
        assert_eq!(id, revived);
        assert!(!store.get_file_by_id(id).unwrap().unwrap().tombstoned);
    }

    #[test]
    fn tombstone_purges_content_keeps_history() {
        let (_dir, store) = store();
        let t = Utc::now();
        let (id, _) = store.upsert_file("/a/x.txt", 1, t, None, "h").unwrap();
        let (other, _) = store.upsert_file("/a/y.txt", 1, t, None, "h").unwrap();
        store.put_content(id, "snippet", Some(&[1.0, 0.0])).unwrap();
        store.record_access(id, t).unwrap();
        store.bump_copair(id, other).unwrap();

        store.tombstone(id).unwrap();
        store.tombstone(id).unwrap(); // idempotent

        assert!(store.get_embedding(id).unwrap().is_none());
        assert!(store.get_activity(id).unwrap().is_some());
        assert_eq!(store.co_count(id, other).unwrap(), 1);
        assert!(store.list_live_files().unwrap().iter().all(|f| f.id != id));
    }

    #[test]
    fn copairs_are_canonical_and_merge_both_orders() {
        let (_dir, store) = store();
        let t = Utc::now();
        let (a, _) = store.upsert_file("/a", 1, t, None, "h").unwrap();
        let (b, _) = store.upsert_file("/b", 1, t, None, "h").unwrap();

        store.bump_copair(b, a).unwrap();
        store.bump_copair(a, b).unwrap();
        assert_eq!(store.co_count(a, b).unwrap(), 2);
        assert_eq!(store.co_count(b, a).unwrap(), 2);
        assert_eq!(store.copartners(a).unwrap(), vec![(b, 2)]);
        assert!(store.bump_copair(a, a).is_err());
    }

    #[test]
    fn record_access_returns_prior_timestamp_and_is_monotonic() {
        let (_dir, store) = store();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        let (id, _) = store.upsert_file("/a", 1, t0, None, "h").unwrap();

        let (prior, count) = store.record_access(id, t0).unwrap();
        assert!(prior.is_none());
        assert_eq!(count, 1);

        let (prior, count) = store.record_access(id, t1).unwrap();
        assert_eq!(prior.unwrap().timestamp_millis(), t0.timestamp_millis());
        assert_eq!(count, 2);

        // Out-of-order timestamp must not move last_accessed backwards.
        store.record_access(id, t0).unwrap();
        let rec = store.get_activity(id).unwrap().unwrap();
        assert_eq!(rec.last_accessed.timestamp_millis(), t1.timestamp_millis());
        assert_eq!(rec.access_count, 3);
    }

    #[test]
    fn embedding_blob_round_trips() {
        let (_dir, store) = store();
        let (id, _) = store.upsert_file("/a", 1, Utc::now(), None, "h").unwrap();
        let vector = vec![0.25_f32, -1.5, 3.0];
        store.put_content(id, "text", Some(&vector)).unwrap();
        assert_eq!(store.get_embedding(id).unwrap().unwrap(), vector);

        store.put_content(id, "", None).unwrap();
        assert!(store.get_embedding(id).unwrap().is_none());
        assert_eq!(store.get_snippet(id).unwrap().unwrap(), "");
    }

    #[test]
    fn scan_epoch_is_monotonic() {
        let (_dir, store) = store();
        assert_eq!(store.scan_epoch().unwrap(), 0);
        assert_eq!(store.bump_scan_epoch().unwrap(), 1);
        assert_eq!(store.bump_scan_epoch().unwrap(), 2);
        assert_eq!(store.scan_epoch().unwrap(), 2);
    }
}
