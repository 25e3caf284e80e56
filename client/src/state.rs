//! Local state database.
//!
//! One row per known path, keyed by the server-normalized (lowercase,
//! forward-slash, leading `/`) form. `synced` and `current_revision`
//! together describe where a path stands: `current_revision == 0` means the
//! file has never round-tripped through the server; `synced == false` means
//! metadata is known but the on-disk content does not (yet) match it.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use time::OffsetDateTime;

use models::Metadata;
use toolkit::parent_dir;

pub struct StateDb {
    conn: Connection,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileState {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub parent: String,
    pub is_dir: bool,
    pub is_removed: bool,
    pub size: i64,
    pub hash: String,
    pub modification_time: i64,
    pub current_revision: i64,
    pub parent_revision: i64,
    pub synced: bool,
}

impl FileState {
    /// Project the row back into wire metadata, e.g. for re-uploading.
    pub fn metadata(&self) -> Metadata {
        Metadata {
            size: self.size,
            rev: self.current_revision,
            name: self.name.clone(),
            is_dir: self.is_dir,
            modified: self.modification_time,
            is_removed: self.is_removed,
            path: self.path.clone(),
            hash: self.hash.clone(),
        }
    }
}

impl StateDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = StateDb { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = StateDb { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                path              TEXT NOT NULL UNIQUE,
                name              TEXT NOT NULL,
                parent            TEXT NOT NULL,
                is_dir            INTEGER NOT NULL,
                is_removed        INTEGER NOT NULL DEFAULT 0,
                size              INTEGER NOT NULL DEFAULT 0,
                hash              TEXT NOT NULL DEFAULT '',
                modification_time INTEGER NOT NULL DEFAULT 0,
                current_revision  INTEGER NOT NULL DEFAULT 0,
                parent_revision   INTEGER NOT NULL DEFAULT 0,
                synced            INTEGER NOT NULL DEFAULT 0,
                created           INTEGER NOT NULL,
                updated           INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS config (
                key    TEXT PRIMARY KEY,
                value  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_parent ON files (parent);
        "#,
        )?;
        Ok(())
    }

    pub fn get_file_by_path(&self, path: &str) -> Result<Option<FileState>> {
        self.conn
            .query_row(
                "SELECT id, path, name, parent, is_dir, is_removed, size, hash,
                        modification_time, current_revision, parent_revision, synced
                 FROM files WHERE path = ?1",
                params![path],
                file_from_row,
            )
            .optional()
    }

    /// Insert or update the row for `file.path`.
    pub fn save(&self, file: &FileState) -> Result<()> {
        let now = now_ts();
        self.conn.execute(
            r#"
            INSERT INTO files
              (path, name, parent, is_dir, is_removed, size, hash,
               modification_time, current_revision, parent_revision, synced, created, updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                parent = excluded.parent,
                is_dir = excluded.is_dir,
                is_removed = excluded.is_removed,
                size = excluded.size,
                hash = excluded.hash,
                modification_time = excluded.modification_time,
                current_revision = excluded.current_revision,
                parent_revision = excluded.parent_revision,
                synced = excluded.synced,
                updated = excluded.updated
            "#,
            params![
                file.path,
                file.name,
                file.parent,
                file.is_dir as i64,
                file.is_removed as i64,
                file.size,
                file.hash,
                file.modification_time,
                file.current_revision,
                file.parent_revision,
                file.synced as i64,
                now,
            ],
        )?;
        Ok(())
    }

    /// Record server metadata for a path, e.g. while seeding from a
    /// full-state delta.
    pub fn add_file(&self, path: &str, metadata: &Metadata, synced: bool) -> Result<()> {
        let file = FileState {
            id: 0,
            path: path.to_string(),
            name: metadata.name.clone(),
            parent: parent_dir(path),
            is_dir: metadata.is_dir,
            is_removed: false,
            size: metadata.size,
            hash: metadata.hash.clone(),
            modification_time: metadata.modified,
            current_revision: metadata.rev,
            parent_revision: 0,
            synced,
        };
        self.save(&file)
    }

    /// Files whose content is not yet materialized on disk.
    pub fn get_unsynced_files(&self) -> Result<Vec<FileState>> {
        self.query_files("SELECT id, path, name, parent, is_dir, is_removed, size, hash,
                          modification_time, current_revision, parent_revision, synced
                          FROM files WHERE synced = 0 ORDER BY path ASC")
    }

    /// Files that have never been uploaded to the server.
    pub fn get_not_uploaded_files(&self) -> Result<Vec<FileState>> {
        self.query_files("SELECT id, path, name, parent, is_dir, is_removed, size, hash,
                          modification_time, current_revision, parent_revision, synced
                          FROM files WHERE current_revision = 0 ORDER BY path ASC")
    }

    pub fn get_children(&self, parent: &str) -> Result<Vec<FileState>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path, name, parent, is_dir, is_removed, size, hash,
                    modification_time, current_revision, parent_revision, synced
             FROM files WHERE parent = ?1 ORDER BY path ASC",
        )?;
        let rows = stmt.query_map(params![parent], file_from_row)?;
        rows.collect()
    }

    fn query_files(&self, sql: &str) -> Result<Vec<FileState>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], file_from_row)?;
        rows.collect()
    }

    pub fn update_modification_time(&self, path: &str, mtime: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE files SET modification_time = ?1, updated = ?2 WHERE path = ?3",
            params![mtime, now_ts(), path],
        )?;
        Ok(())
    }

    pub fn mark_synced(&self, path: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE files SET synced = 1, updated = ?1 WHERE path = ?2",
            params![now_ts(), path],
        )?;
        Ok(())
    }

    /// Delete the row at `path` and, recursively, every row below it.
    pub fn remove_all(&self, path: &str) -> Result<()> {
        let children: Vec<String> = {
            let mut stmt = self.conn.prepare("SELECT path FROM files WHERE parent = ?1")?;
            let rows = stmt.query_map(params![path], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>>>()?
        };
        for child in children {
            self.remove_all(&child)?;
        }
        self.conn
            .execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(())
    }

    /* Config key/value store */

    /// Value for `key`, or the empty string when unset.
    pub fn get_cfg_value(&self, key: &str) -> Result<String> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_default())
    }

    pub fn set_cfg_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

fn now_ts() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn file_from_row(row: &Row<'_>) -> Result<FileState> {
    let is_dir: i64 = row.get(4)?;
    let is_removed: i64 = row.get(5)?;
    let synced: i64 = row.get(11)?;
    Ok(FileState {
        id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        parent: row.get(3)?,
        is_dir: is_dir != 0,
        is_removed: is_removed != 0,
        size: row.get(6)?,
        hash: row.get(7)?,
        modification_time: row.get(8)?,
        current_revision: row.get(9)?,
        parent_revision: row.get(10)?,
        synced: synced != 0,
    })
}
