//! The embedded metadata store.
//!
//! A single SQLite file holds four tables:
//!
//! - `drive_files`: mirror of remote objects, keyed by remote id;
//! - `files`: the materialized live tree, one row per path;
//! - `bin`: the materialized trashed tree, same shape;
//! - `request_queue`: durable queue of deferred mutations.
//!
//! The mirror and materialized tables are truncated on every open and
//! rebuilt from the remote; only `request_queue` survives a restart, which
//! is what crash recovery of deferred mutations needs. The SQLite `rowid`
//! of a materialized row is the kernel inode: rows are always updated in
//! place so inodes stay stable for the life of a mount, and the root is
//! inserted first into each fresh table so it lands on rowid 1.
//!
//! All access serializes through one mutex around the connection.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::types::{
    join_path, DriveFileRow, Error, FileRow, FsResult, Inode, ObjectKind, FOLDER_MIME_TYPE,
    ROOT_ID,
};

/// A pending row of `request_queue`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    pub id: i64,
    pub request_type: String,
    pub payload: String,
    pub attempts: u32,
}

pub struct Store {
    conn: Mutex<Connection>,
}

const FILE_COLUMNS: &str = "id, parent_id, dirname, basename, path, file_size, \
                            atime, ctime, mtime, mime_type, is_dir, is_link, \
                            target_id, target_path";

fn table(bin: bool) -> &'static str {
    if bin {
        "bin"
    } else {
        "files"
    }
}

fn file_row(row: &Row) -> rusqlite::Result<(Inode, FileRow)> {
    Ok((
        row.get::<_, i64>(0)? as Inode,
        FileRow {
            id: row.get(1)?,
            parent_id: row.get(2)?,
            dirname: row.get(3)?,
            basename: row.get(4)?,
            path: row.get(5)?,
            file_size: row.get::<_, i64>(6)? as u64,
            atime: row.get(7)?,
            ctime: row.get(8)?,
            mtime: row.get(9)?,
            mime_type: row.get(10)?,
            is_dir: row.get(11)?,
            is_link: row.get(12)?,
            target_id: row.get(13)?,
            target_path: row.get(14)?,
        },
    ))
}

/// Appends ` (N)` before the extension, the disambiguation scheme for
/// duplicate basenames under one parent.
fn numbered_name(name: &str, n: u32) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", name, n),
    }
}

impl Store {
    /// Opens (or creates) the store at `path` and resets the mirror and
    /// materialized tables.
    pub fn open(path: &Path) -> FsResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> FsResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> FsResult<Self> {
        let store = Store {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> FsResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "BEGIN;
             DROP TABLE IF EXISTS drive_files;
             DROP TABLE IF EXISTS files;
             DROP TABLE IF EXISTS bin;
             CREATE TABLE drive_files (
                 id TEXT NOT NULL UNIQUE,
                 parent_id TEXT,
                 name TEXT NOT NULL,
                 file_size INTEGER NOT NULL,
                 atime INTEGER NOT NULL,
                 ctime INTEGER NOT NULL,
                 mtime INTEGER NOT NULL,
                 mime_type TEXT NOT NULL,
                 target_id TEXT,
                 trashed INTEGER NOT NULL,
                 md5 TEXT
             );
             CREATE INDEX drive_files_id_index ON drive_files (id);
             CREATE INDEX drive_files_parent_id_index ON drive_files (parent_id);
             CREATE INDEX drive_files_name_index ON drive_files (name);
             CREATE TABLE files (
                 id TEXT UNIQUE,
                 parent_id TEXT,
                 dirname TEXT NOT NULL,
                 basename TEXT NOT NULL,
                 path TEXT NOT NULL UNIQUE,
                 file_size INTEGER NOT NULL,
                 atime INTEGER NOT NULL,
                 ctime INTEGER NOT NULL,
                 mtime INTEGER NOT NULL,
                 mime_type TEXT NOT NULL,
                 is_dir INTEGER NOT NULL,
                 is_link INTEGER NOT NULL,
                 target_id TEXT,
                 target_path TEXT
             );
             CREATE INDEX files_parent_id_index ON files (parent_id);
             CREATE TABLE bin (
                 id TEXT UNIQUE,
                 parent_id TEXT,
                 dirname TEXT NOT NULL,
                 basename TEXT NOT NULL,
                 path TEXT NOT NULL UNIQUE,
                 file_size INTEGER NOT NULL,
                 atime INTEGER NOT NULL,
                 ctime INTEGER NOT NULL,
                 mtime INTEGER NOT NULL,
                 mime_type TEXT NOT NULL,
                 is_dir INTEGER NOT NULL,
                 is_link INTEGER NOT NULL,
                 target_id TEXT,
                 target_path TEXT
             );
             CREATE INDEX bin_parent_id_index ON bin (parent_id);
             CREATE TABLE IF NOT EXISTS request_queue (
                 request_type TEXT NOT NULL,
                 payload TEXT NOT NULL,
                 attempts INTEGER NOT NULL DEFAULT 0
             );
             COMMIT;",
        )?;

        // Root lands on rowid 1 of each fresh materialized table, matching
        // the kernel's reserved root inode.
        for bin in [false, true] {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES (?1, NULL, '/', '', '/', 0, 0, 0, 0, ?2, 1, 0, NULL, NULL)",
                    table(bin),
                    FILE_COLUMNS
                ),
                params![ROOT_ID, FOLDER_MIME_TYPE],
            )?;
        }
        conn.execute(
            "INSERT INTO drive_files (id, parent_id, name, file_size, atime, ctime, mtime, \
             mime_type, target_id, trashed, md5) \
             VALUES (?1, NULL, '/', 0, 0, 0, 0, ?2, NULL, 0, NULL)",
            params![ROOT_ID, FOLDER_MIME_TYPE],
        )?;
        Ok(())
    }

    // ----------------------------------------------------------------
    // drive_files

    pub fn put_drive_file(&self, file: &DriveFileRow) -> FsResult<()> {
        let conn = self.conn.lock().unwrap();
        Self::upsert_drive_file(&conn, file)?;
        Ok(())
    }

    pub fn put_drive_files(&self, files: &[DriveFileRow]) -> FsResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for file in files {
            Self::upsert_drive_file(&tx, file)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_drive_file(conn: &Connection, file: &DriveFileRow) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT OR REPLACE INTO drive_files \
             (id, parent_id, name, file_size, atime, ctime, mtime, mime_type, target_id, trashed, md5) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                file.id,
                file.parent_id,
                file.name,
                file.file_size as i64,
                file.atime,
                file.ctime,
                file.mtime,
                file.mime_type,
                file.target_id,
                file.trashed,
                file.md5,
            ],
        )
    }

    pub fn get_drive_file(&self, id: &str) -> FsResult<Option<DriveFileRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, parent_id, name, file_size, atime, ctime, mtime, mime_type, \
             target_id, trashed, md5 FROM drive_files WHERE id = ?1",
            params![id],
            |row| {
                Ok(DriveFileRow {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                    name: row.get(2)?,
                    file_size: row.get::<_, i64>(3)? as u64,
                    atime: row.get(4)?,
                    ctime: row.get(5)?,
                    mtime: row.get(6)?,
                    mime_type: row.get(7)?,
                    target_id: row.get(8)?,
                    trashed: row.get(9)?,
                    md5: row.get(10)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn delete_drive_file(&self, id: &str) -> FsResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM drive_files WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn reparent_drive_file(&self, id: &str, new_parent_id: &str) -> FsResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE drive_files SET parent_id = ?2 WHERE id = ?1",
            params![id, new_parent_id],
        )?;
        Ok(())
    }

    // ----------------------------------------------------------------
    // Materialized trees

    /// Materializes a mirror row into the live (or trashed) tree.
    ///
    /// This is the only operation composing `path`: it reads the parent's
    /// path, so callers must materialize parents before children. A path
    /// collision with a different object bumps the basename to ` (N)`; a
    /// collision with a placeholder adopts the placeholder's row, which
    /// keeps its rowid, and therefore its inode, stable.
    pub fn materialize(&self, file: &DriveFileRow) -> FsResult<(Inode, FileRow)> {
        let bin = file.trashed;
        let t = table(bin);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if file.id == ROOT_ID {
            tx.execute(
                &format!(
                    "UPDATE {} SET file_size = ?1, atime = ?2, ctime = ?3, mtime = ?4 WHERE path = '/'",
                    t
                ),
                params![file.file_size as i64, file.atime, file.ctime, file.mtime],
            )?;
            let found = Self::row_where(&tx, t, "path = ?1", params!["/"])?;
            tx.commit()?;
            return found.ok_or_else(|| Error::not_found("root row"));
        }

        let parent_id = file.parent_id.as_deref().unwrap_or(ROOT_ID);
        let parent = Self::row_where(&tx, t, "id = ?1", params![parent_id])?
            .ok_or_else(|| Error::not_found(format!("parent '{}' of '{}'", parent_id, file.name)))?
            .1;

        let existing = Self::row_where(&tx, t, "id = ?1", params![file.id])?;

        // Compose a unique path under the parent.
        let mut adopted_placeholder: Option<Inode> = None;
        let mut basename = file.name.clone();
        let mut path = join_path(&parent.path, &basename);
        let mut bump = 0u32;
        loop {
            match Self::row_where(&tx, t, "path = ?1", params![path])? {
                None => break,
                Some((_, occupant)) if occupant.id.as_deref() == Some(file.id.as_str()) => break,
                Some((ino, occupant)) if occupant.id.is_none() && existing.is_none() => {
                    adopted_placeholder = Some(ino);
                    break;
                }
                Some(_) => {
                    bump += 1;
                    basename = numbered_name(&file.name, bump);
                    path = join_path(&parent.path, &basename);
                }
            }
        }

        let kind = file.kind();
        let is_dir = kind == ObjectKind::Folder;
        let is_link = kind == ObjectKind::Shortcut;
        let target_path = match &file.target_id {
            Some(target_id) => Self::row_where(&tx, t, "id = ?1", params![target_id])?
                .map(|(_, target)| target.path),
            None => None,
        };

        if let Some((ino, old)) = &existing {
            tx.execute(
                &format!(
                    "UPDATE {} SET parent_id = ?1, dirname = ?2, basename = ?3, path = ?4, \
                     file_size = ?5, atime = ?6, ctime = ?7, mtime = ?8, mime_type = ?9, \
                     is_dir = ?10, is_link = ?11, target_id = ?12, target_path = ?13 \
                     WHERE rowid = ?14",
                    t
                ),
                params![
                    parent_id,
                    parent.path,
                    basename,
                    path,
                    file.file_size as i64,
                    file.atime,
                    file.ctime,
                    file.mtime,
                    file.mime_type,
                    is_dir,
                    is_link,
                    file.target_id,
                    target_path,
                    *ino as i64,
                ],
            )?;
            if old.is_dir && old.path != path {
                Self::rewrite_descendants(&tx, t, &old.path, &path)?;
            }
        } else if let Some(ino) = adopted_placeholder {
            tx.execute(
                &format!(
                    "UPDATE {} SET id = ?1, parent_id = ?2, file_size = ?3, atime = ?4, \
                     ctime = ?5, mtime = ?6, mime_type = ?7, is_dir = ?8, is_link = ?9, \
                     target_id = ?10, target_path = ?11 WHERE rowid = ?12",
                    t
                ),
                params![
                    file.id,
                    parent_id,
                    file.file_size as i64,
                    file.atime,
                    file.ctime,
                    file.mtime,
                    file.mime_type,
                    is_dir,
                    is_link,
                    file.target_id,
                    target_path,
                    ino as i64,
                ],
            )?;
        } else {
            tx.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    t, FILE_COLUMNS
                ),
                params![
                    file.id,
                    parent_id,
                    parent.path,
                    basename,
                    path,
                    file.file_size as i64,
                    file.atime,
                    file.ctime,
                    file.mtime,
                    file.mime_type,
                    is_dir,
                    is_link,
                    file.target_id,
                    target_path,
                ],
            )?;
        }

        let found = Self::row_where(&tx, t, "path = ?1", params![path])?
            .ok_or_else(|| Error::not_found(format!("materialized row '{}'", path)))?;
        tx.commit()?;
        Ok(found)
    }

    /// Renaming a directory moves its whole subtree; every descendant's
    /// `dirname` and `path` keep the composition invariant.
    fn rewrite_descendants(
        conn: &Connection,
        t: &str,
        old_path: &str,
        new_path: &str,
    ) -> rusqlite::Result<()> {
        let cut = old_path.len() as i64 + 1;
        conn.execute(
            &format!(
                "UPDATE {} SET \
                 path = ?2 || substr(path, ?3), \
                 dirname = CASE WHEN dirname = ?1 THEN ?2 ELSE ?2 || substr(dirname, ?3) END \
                 WHERE path LIKE ?1 || '/%'",
                t
            ),
            params![old_path, new_path, cut],
        )?;
        Ok(())
    }

    /// Inserts an optimistic row with no id; the request queue worker
    /// either reconciles it with the server identity or removes it.
    pub fn insert_placeholder(
        &self,
        parent: &FileRow,
        name: &str,
        is_dir: bool,
        now: i64,
        bin: bool,
    ) -> FsResult<(Inode, FileRow)> {
        let t = table(bin);
        let path = join_path(&parent.path, name);
        let mime_type = if is_dir {
            FOLDER_MIME_TYPE
        } else {
            "application/octet-stream"
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) \
                 VALUES (NULL, ?1, ?2, ?3, ?4, 0, ?5, ?5, ?5, ?6, ?7, 0, NULL, NULL)",
                t, FILE_COLUMNS
            ),
            params![parent.id, parent.path, name, path, now, mime_type, is_dir],
        )?;
        Self::row_where(&conn, t, "path = ?1", params![path])?
            .ok_or_else(|| Error::not_found(format!("placeholder '{}'", path)))
    }

    fn row_where(
        conn: &Connection,
        t: &str,
        predicate: &str,
        values: impl rusqlite::Params,
    ) -> rusqlite::Result<Option<(Inode, FileRow)>> {
        conn.query_row(
            &format!("SELECT rowid, {} FROM {} WHERE {}", FILE_COLUMNS, t, predicate),
            values,
            file_row,
        )
        .optional()
    }

    pub fn file_by_inode(&self, inode: Inode, bin: bool) -> FsResult<Option<(Inode, FileRow)>> {
        let conn = self.conn.lock().unwrap();
        Self::row_where(&conn, table(bin), "rowid = ?1", params![inode as i64]).map_err(Error::from)
    }

    pub fn file_by_id(&self, id: &str, bin: bool) -> FsResult<Option<(Inode, FileRow)>> {
        let conn = self.conn.lock().unwrap();
        Self::row_where(&conn, table(bin), "id = ?1", params![id]).map_err(Error::from)
    }

    pub fn file_by_path(&self, path: &str, bin: bool) -> FsResult<Option<(Inode, FileRow)>> {
        let conn = self.conn.lock().unwrap();
        Self::row_where(&conn, table(bin), "path = ?1", params![path]).map_err(Error::from)
    }

    /// Children sorted by rowid, which is the inode order `readdir` must
    /// emit for kernel offset resumption. Keyed by the parent's path so
    /// placeholder parents (id `NULL`) list their children too.
    pub fn children_of(&self, parent_path: &str, bin: bool) -> FsResult<Vec<(Inode, FileRow)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT rowid, {} FROM {} WHERE dirname = ?1 AND path != '/' ORDER BY rowid",
            FILE_COLUMNS,
            table(bin)
        ))?;
        let rows = stmt
            .query_map(params![parent_path], file_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_file_by_id(&self, id: &str, bin: bool) -> FsResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", table(bin)),
            params![id],
        )?;
        Ok(())
    }

    pub fn delete_file_by_path(&self, path: &str, bin: bool) -> FsResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("DELETE FROM {} WHERE path = ?1", table(bin)),
            params![path],
        )?;
        Ok(())
    }

    pub fn count_files(&self, bin: bool) -> FsResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table(bin)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every materialized row, for invariant checks and diagnostics.
    pub fn all_files(&self, bin: bool) -> FsResult<Vec<(Inode, FileRow)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT rowid, {} FROM {} ORDER BY rowid",
            FILE_COLUMNS,
            table(bin)
        ))?;
        let rows = stmt
            .query_map([], file_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ----------------------------------------------------------------
    // Request queue

    pub fn enqueue_request(&self, request_type: &str, payload: &str) -> FsResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO request_queue (request_type, payload) VALUES (?1, ?2)",
            params![request_type, payload],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Pending requests in FIFO enqueue order.
    pub fn list_requests(&self) -> FsResult<Vec<QueuedRequest>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT rowid, request_type, payload, attempts FROM request_queue ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(QueuedRequest {
                    id: row.get(0)?,
                    request_type: row.get(1)?,
                    payload: row.get(2)?,
                    attempts: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_request(&self, id: i64) -> FsResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM request_queue WHERE rowid = ?1", params![id])?;
        Ok(())
    }

    /// Removes a request by exact content, used to cancel a pending
    /// mutation whose local effect was undone before the worker ran.
    pub fn delete_request_by_payload(&self, request_type: &str, payload: &str) -> FsResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM request_queue WHERE request_type = ?1 AND payload = ?2",
            params![request_type, payload],
        )?;
        Ok(())
    }

    /// Bumps and returns the attempt count for a failing request.
    pub fn record_attempt(&self, id: i64) -> FsResult<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE request_queue SET attempts = attempts + 1 WHERE rowid = ?1",
            params![id],
        )?;
        let attempts: u32 = conn.query_row(
            "SELECT attempts FROM request_queue WHERE rowid = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ROOT_INODE;

    fn drive_file(id: &str, parent: &str, name: &str, mime: &str) -> DriveFileRow {
        DriveFileRow {
            id: id.to_string(),
            parent_id: Some(parent.to_string()),
            name: name.to_string(),
            file_size: 7,
            atime: 10,
            ctime: 20,
            mtime: 30,
            mime_type: mime.to_string(),
            target_id: None,
            trashed: false,
            md5: Some("d41d8cd98f00b204e9800998ecf8427e".to_string()),
        }
    }

    fn folder(id: &str, parent: &str, name: &str) -> DriveFileRow {
        let mut f = drive_file(id, parent, name, FOLDER_MIME_TYPE);
        f.file_size = 0;
        f.md5 = None;
        f
    }

    #[test]
    fn test_root_bootstraps_at_inode_one() {
        let store = Store::open_in_memory().unwrap();
        for bin in [false, true] {
            let (ino, row) = store.file_by_path("/", bin).unwrap().unwrap();
            assert_eq!(ino, ROOT_INODE);
            assert_eq!(row.id.as_deref(), Some(ROOT_ID));
            assert_eq!(row.dirname, "/");
            assert_eq!(row.basename, "");
            assert!(row.is_dir);
        }
    }

    #[test]
    fn test_put_then_get_drive_file_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let file = drive_file("f1", ROOT_ID, "a.txt", "text/plain");
        store.put_drive_file(&file).unwrap();
        assert_eq!(store.get_drive_file("f1").unwrap().unwrap(), file);
        assert!(store.get_drive_file("missing").unwrap().is_none());
    }

    #[test]
    fn test_materialize_composes_paths() {
        let store = Store::open_in_memory().unwrap();
        let dir = folder("d1", ROOT_ID, "B");
        let (dir_ino, dir_row) = store.materialize(&dir).unwrap();
        assert_eq!(dir_row.path, "/B");
        assert_eq!(dir_row.dirname, "/");
        assert!(dir_ino > ROOT_INODE);

        let child = drive_file("f1", "d1", "C.txt", "text/plain");
        let (_, child_row) = store.materialize(&child).unwrap();
        assert_eq!(child_row.path, "/B/C.txt");
        assert_eq!(child_row.dirname, "/B");
        assert_eq!(child_row.file_size, 7);
    }

    #[test]
    fn test_materialize_requires_parent_first() {
        let store = Store::open_in_memory().unwrap();
        let orphan = drive_file("f1", "nowhere", "a.txt", "text/plain");
        assert!(matches!(
            store.materialize(&orphan),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_basenames_get_numbered() {
        let store = Store::open_in_memory().unwrap();
        let first = drive_file("f1", ROOT_ID, "a.txt", "text/plain");
        let second = drive_file("f2", ROOT_ID, "a.txt", "text/plain");
        let third = drive_file("f3", ROOT_ID, "a.txt", "text/plain");

        assert_eq!(store.materialize(&first).unwrap().1.path, "/a.txt");
        assert_eq!(store.materialize(&second).unwrap().1.path, "/a (1).txt");
        assert_eq!(store.materialize(&third).unwrap().1.path, "/a (2).txt");

        // Re-materializing an already-present object keeps its path.
        assert_eq!(store.materialize(&second).unwrap().1.path, "/a (1).txt");
    }

    #[test]
    fn test_numbered_name_edge_cases() {
        assert_eq!(numbered_name("a.txt", 1), "a (1).txt");
        assert_eq!(numbered_name("archive.tar.gz", 2), "archive.tar (2).gz");
        assert_eq!(numbered_name("Makefile", 1), "Makefile (1)");
        assert_eq!(numbered_name(".profile", 1), ".profile (1)");
    }

    #[test]
    fn test_placeholder_reconciliation_keeps_inode() {
        let store = Store::open_in_memory().unwrap();
        let (_, root) = store.file_by_path("/", false).unwrap().unwrap();
        let (placeholder_ino, placeholder) = store
            .insert_placeholder(&root, "Z", true, 1234, false)
            .unwrap();
        assert!(placeholder.id.is_none());
        assert_eq!(placeholder.path, "/Z");
        assert_eq!(placeholder.atime, 1234);

        let (ino, row) = store.materialize(&folder("srv9", ROOT_ID, "Z")).unwrap();
        assert_eq!(ino, placeholder_ino);
        assert_eq!(row.id.as_deref(), Some("srv9"));
        assert_eq!(row.path, "/Z");
        assert_eq!(store.count_files(false).unwrap(), 2);
    }

    #[test]
    fn test_rename_updates_row_in_place() {
        let store = Store::open_in_memory().unwrap();
        let (old_ino, _) = store
            .materialize(&drive_file("f1", ROOT_ID, "a.txt", "text/plain"))
            .unwrap();

        let renamed = drive_file("f1", ROOT_ID, "b.txt", "text/plain");
        let (new_ino, row) = store.materialize(&renamed).unwrap();
        assert_eq!(new_ino, old_ino);
        assert_eq!(row.path, "/b.txt");
        assert!(store.file_by_path("/a.txt", false).unwrap().is_none());
    }

    #[test]
    fn test_directory_rename_rewrites_descendants() {
        let store = Store::open_in_memory().unwrap();
        store.materialize(&folder("d1", ROOT_ID, "B")).unwrap();
        store.materialize(&folder("d2", "d1", "inner")).unwrap();
        store
            .materialize(&drive_file("f1", "d2", "C.txt", "text/plain"))
            .unwrap();

        store.materialize(&folder("d1", ROOT_ID, "Moved")).unwrap();

        let (_, inner) = store.file_by_id("d2", false).unwrap().unwrap();
        assert_eq!(inner.path, "/Moved/inner");
        assert_eq!(inner.dirname, "/Moved");
        let (_, leaf) = store.file_by_id("f1", false).unwrap().unwrap();
        assert_eq!(leaf.path, "/Moved/inner/C.txt");
        assert_eq!(leaf.dirname, "/Moved/inner");

        // Path composition invariant holds for every row.
        for (_, row) in store.all_files(false).unwrap() {
            if row.path != "/" {
                assert_eq!(row.path, join_path(&row.dirname, &row.basename));
            }
        }
    }

    #[test]
    fn test_shortcut_target_path_resolution() {
        let store = Store::open_in_memory().unwrap();
        store
            .materialize(&drive_file("f1", ROOT_ID, "a.txt", "text/plain"))
            .unwrap();

        let mut link = drive_file("s1", ROOT_ID, "L", crate::types::SHORTCUT_MIME_TYPE);
        link.md5 = None;
        link.target_id = Some("f1".to_string());
        let (_, row) = store.materialize(&link).unwrap();
        assert!(row.is_link);
        assert_eq!(row.target_path.as_deref(), Some("/a.txt"));

        // Dangling target is allowed.
        let mut dangling = drive_file("s2", ROOT_ID, "L2", crate::types::SHORTCUT_MIME_TYPE);
        dangling.md5 = None;
        dangling.target_id = Some("gone".to_string());
        let (_, row) = store.materialize(&dangling).unwrap();
        assert_eq!(row.target_path, None);
    }

    #[test]
    fn test_trashed_rows_land_in_bin() {
        let store = Store::open_in_memory().unwrap();
        let mut file = drive_file("f1", ROOT_ID, "a.txt", "text/plain");
        file.trashed = true;
        let (ino, row) = store.materialize(&file).unwrap();
        assert_eq!(row.path, "/a.txt");
        assert!(store.file_by_path("/a.txt", false).unwrap().is_none());
        assert_eq!(store.file_by_inode(ino, true).unwrap().unwrap().1, row);
    }

    #[test]
    fn test_children_ordered_by_inode() {
        let store = Store::open_in_memory().unwrap();
        store
            .materialize(&drive_file("f2", ROOT_ID, "b.txt", "text/plain"))
            .unwrap();
        store
            .materialize(&drive_file("f1", ROOT_ID, "a.txt", "text/plain"))
            .unwrap();
        store.materialize(&folder("d1", ROOT_ID, "dir")).unwrap();

        let children = store.children_of("/", false).unwrap();
        let inodes: Vec<Inode> = children.iter().map(|(ino, _)| *ino).collect();
        let mut sorted = inodes.clone();
        sorted.sort_unstable();
        assert_eq!(inodes, sorted);
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn test_request_queue_fifo_and_attempts() {
        let store = Store::open_in_memory().unwrap();
        let first = store.enqueue_request("mkdir", r#"{"dirname":"/","name":"A"}"#).unwrap();
        let second = store.enqueue_request("mkdir", r#"{"dirname":"/A","name":"B"}"#).unwrap();

        let pending = store.list_requests().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[1].id, second);
        assert_eq!(pending[0].attempts, 0);

        assert_eq!(store.record_attempt(first).unwrap(), 1);
        assert_eq!(store.record_attempt(first).unwrap(), 2);

        store.delete_request(first).unwrap();
        let pending = store.list_requests().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second);

        store
            .delete_request_by_payload("mkdir", r#"{"dirname":"/A","name":"B"}"#)
            .unwrap();
        assert!(store.list_requests().unwrap().is_empty());
    }

    #[test]
    fn test_request_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data.db");

        let store = Store::open(&db_path).unwrap();
        store.enqueue_request("mkdir", r#"{"dirname":"/","name":"Z"}"#).unwrap();
        store
            .materialize(&drive_file("f1", ROOT_ID, "a.txt", "text/plain"))
            .unwrap();
        drop(store);

        let store = Store::open(&db_path).unwrap();
        // Mirror tables are rebuilt from scratch; the queue persists.
        assert_eq!(store.count_files(false).unwrap(), 1);
        let pending = store.list_requests().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_type, "mkdir");
    }
}
