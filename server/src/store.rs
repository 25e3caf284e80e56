//! Metadata store: users, sessions, files and the revision chain.
//!
//! `revisions.id` is an `AUTOINCREMENT` primary key shared by all users, so
//! ids are strictly increasing and never reused. A revision's id is the
//! cursor position at which the change it records becomes observable; the
//! per-user cursor is simply the user's highest revision id.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use time::OffsetDateTime;
use tracing::debug;

use models::{Delta, DeltaEntry, Metadata};
use toolkit::{basename, normalize_path, only_clean_path, parent_dir, rand_hex, sha1_hex};

use crate::error::ServerError;

type Result<T> = std::result::Result<T, ServerError>;

pub struct Store {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub salt: String,
    pub password: String,
}

impl User {
    pub fn check_password(&self, password: &str) -> bool {
        sha1_hex(format!("{}{}", self.salt, password).as_bytes()) == self.password
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub computer_name: String,
    pub created: i64,
}

/// One logical path for one user. `is_removed` is a tombstone; the row is
/// never deleted so the path's revision history stays reachable.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: i64,
    pub user_id: i64,
    pub path: String,
    pub parent: String,
    pub is_dir: bool,
    pub is_removed: bool,
    pub current_revision_id: i64,
}

#[derive(Debug, Clone)]
pub struct Revision {
    pub id: i64,
    pub file_id: i64,
    pub user_id: i64,
    pub uuid: String,
    pub size: i64,
    pub hash: String,
    pub name: String,
    pub is_dir: bool,
    pub modified: i64,
    pub created: i64,
    pub updated: i64,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Store { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                username  TEXT NOT NULL UNIQUE,
                salt      TEXT NOT NULL,
                password  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       INTEGER NOT NULL REFERENCES users(id),
                token         TEXT NOT NULL,
                computername  TEXT NOT NULL,
                created       INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id             INTEGER NOT NULL REFERENCES users(id),
                path                TEXT NOT NULL,
                parent              TEXT NOT NULL,
                is_dir              INTEGER NOT NULL,
                is_removed          INTEGER NOT NULL DEFAULT 0,
                current_revision_id INTEGER NOT NULL DEFAULT 0,
                UNIQUE (user_id, path)
            );

            CREATE TABLE IF NOT EXISTS revisions (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id   INTEGER NOT NULL REFERENCES files(id),
                user_id   INTEGER NOT NULL REFERENCES users(id),
                uuid      TEXT NOT NULL,
                size      INTEGER NOT NULL,
                hash      TEXT NOT NULL,
                name      TEXT NOT NULL,
                is_dir    INTEGER NOT NULL,
                modified  INTEGER NOT NULL,
                created   INTEGER NOT NULL,
                updated   INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_parent ON files (user_id, parent);
            CREATE INDEX IF NOT EXISTS idx_revisions_user ON revisions (user_id, id);
        "#,
        )?;
        Ok(())
    }

    /* Users and sessions */

    pub fn create_user(&self, username: &str, password: &str) -> Result<User> {
        if self.get_user(username)?.is_some() {
            return Err(ServerError::UserExists);
        }
        let salt = rand_hex(15);
        let hashed = sha1_hex(format!("{salt}{password}").as_bytes());
        self.conn.execute(
            "INSERT INTO users (username, salt, password) VALUES (?1, ?2, ?3)",
            params![username, salt, hashed],
        )?;
        self.get_user(username)?
            .ok_or_else(|| ServerError::Internal("user vanished after insert".into()))
    }

    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, salt, password FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        salt: row.get(2)?,
                        password: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    /// Create a session without checking anything; callers have already
    /// verified the password.
    pub fn create_session(&self, user: &User, computer_name: &str) -> Result<Session> {
        let token = uuid::Uuid::new_v4().to_string();
        let created = now_ts();
        self.conn.execute(
            "INSERT INTO sessions (user_id, token, computername, created) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, token, computer_name, created],
        )?;
        Ok(Session {
            id: self.conn.last_insert_rowid(),
            user_id: user.id,
            token,
            computer_name: computer_name.to_string(),
            created,
        })
    }

    pub fn get_session(&self, user_id: i64, token: &str) -> Result<Option<Session>> {
        let session = self
            .conn
            .query_row(
                "SELECT id, user_id, token, computername, created
                 FROM sessions WHERE user_id = ?1 AND token = ?2",
                params![user_id, token],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        token: row.get(2)?,
                        computer_name: row.get(3)?,
                        created: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /* Files and revisions */

    pub fn get_file_by_path(&self, user_id: i64, path: &str) -> Result<Option<FileRow>> {
        let file = self
            .conn
            .query_row(
                "SELECT id, user_id, path, parent, is_dir, is_removed, current_revision_id
                 FROM files WHERE user_id = ?1 AND path = ?2",
                params![user_id, path],
                file_from_row,
            )
            .optional()?;
        Ok(file)
    }

    /// Insert or overwrite the file at `filepath` and append one revision,
    /// all in a single transaction. The revision id produced here is the
    /// cursor at which this change becomes visible.
    pub fn create_file(
        &mut self,
        user_id: i64,
        filepath: &str,
        is_dir: bool,
        overwrite: bool,
        uuid: &str,
        size: i64,
        hash: &str,
    ) -> Result<(FileRow, Revision)> {
        let path = normalize_path(&only_clean_path(filepath));
        let parent = parent_dir(&path);
        if parent != "/" {
            match self.get_file_by_path(user_id, &parent)? {
                Some(p) if p.is_dir && !p.is_removed => {}
                _ => return Err(ServerError::ParentMissing(parent)),
            }
        }
        let existing = self.get_file_by_path(user_id, &path)?;
        if let Some(f) = &existing {
            if !overwrite && !f.is_removed {
                return Err(ServerError::AlreadyExists(path));
            }
        }

        let name = basename(&only_clean_path(filepath));
        let now = now_ts();
        let tx = self.conn.transaction()?;
        let file_id = match &existing {
            Some(f) => {
                tx.execute(
                    "UPDATE files SET is_dir = ?1, is_removed = 0 WHERE id = ?2",
                    params![is_dir as i64, f.id],
                )?;
                f.id
            }
            None => {
                tx.execute(
                    "INSERT INTO files (user_id, path, parent, is_dir, is_removed, current_revision_id)
                     VALUES (?1, ?2, ?3, ?4, 0, 0)",
                    params![user_id, path, parent, is_dir as i64],
                )?;
                tx.last_insert_rowid()
            }
        };
        let rev_id = insert_revision(&tx, file_id, user_id, uuid, size, hash, &name, is_dir, now)?;
        tx.execute(
            "UPDATE files SET current_revision_id = ?1 WHERE id = ?2",
            params![rev_id, file_id],
        )?;
        tx.commit()?;
        debug!(user_id, %path, rev_id, "created file revision");

        let file = self
            .get_file_by_path(user_id, &path)?
            .ok_or_else(|| ServerError::Internal("file vanished after insert".into()))?;
        let revision = self.revision_by_id(rev_id)?;
        Ok((file, revision))
    }

    /// Folder creation is file creation without content or overwrite.
    pub fn create_folder(&mut self, user_id: i64, filepath: &str) -> Result<(FileRow, Revision)> {
        self.create_file(user_id, filepath, true, false, "", 0, "")
    }

    /// Upload path: always overwrites, yielding a fresh revision even when
    /// the content is byte-identical to the previous one.
    pub fn create_revision(
        &mut self,
        user_id: i64,
        filepath: &str,
        uuid: &str,
        size: i64,
        hash: &str,
    ) -> Result<Revision> {
        let (_, revision) = self.create_file(user_id, filepath, false, true, uuid, size, hash)?;
        Ok(revision)
    }

    /// Tombstone the file at `path` and, recursively, every live child.
    /// Only the top-level target gets a revision entry, so a directory
    /// removal surfaces in deltas as a single tombstone.
    pub fn remove(&mut self, user_id: i64, filepath: &str) -> Result<(FileRow, Revision)> {
        let path = normalize_path(filepath);
        let file = self
            .get_file_by_path(user_id, &path)?
            .ok_or_else(|| ServerError::NotFound(path.clone()))?;
        let current = self
            .conn
            .query_row(
                "SELECT id, file_id, user_id, uuid, size, hash, name, is_dir, modified, created, updated
                 FROM revisions WHERE id = ?1",
                params![file.current_revision_id],
                revision_from_row,
            )
            .optional()?;

        let now = now_ts();
        let tx = self.conn.transaction()?;
        if file.is_dir {
            tombstone_children(&tx, user_id, &file.path)?;
        }
        tx.execute(
            "UPDATE files SET is_removed = 1 WHERE id = ?1",
            params![file.id],
        )?;
        // The removal itself must advance the cursor, so the target gets one
        // new revision carrying the last known content identity.
        let (uuid, size, hash, name) = match &current {
            Some(r) => (r.uuid.clone(), r.size, r.hash.clone(), r.name.clone()),
            None => (String::new(), 0, String::new(), basename(&file.path)),
        };
        let rev_id = insert_revision(
            &tx,
            file.id,
            user_id,
            &uuid,
            size,
            &hash,
            &name,
            file.is_dir,
            now,
        )?;
        tx.execute(
            "UPDATE files SET current_revision_id = ?1 WHERE id = ?2",
            params![rev_id, file.id],
        )?;
        tx.commit()?;
        debug!(user_id, %path, rev_id, "removed path");

        let file = self
            .get_file_by_path(user_id, &path)?
            .ok_or_else(|| ServerError::Internal("file vanished during remove".into()))?;
        let revision = self.revision_by_id(rev_id)?;
        Ok((file, revision))
    }

    /* Cursor queries */

    /// All changes visible past `cursor`, ascending by revision id, paired
    /// with the user's current cursor. Tombstoned paths map to `None`.
    pub fn changes_from_cursor(
        &self,
        user_id: i64,
        cursor: i64,
    ) -> Result<(Vec<DeltaEntry>, i64)> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(id) FROM revisions WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        let Some(new_cursor) = max else {
            return Ok((Vec::new(), 0));
        };

        let mut stmt = self.conn.prepare(
            "SELECT r.hash, f.path, r.name, f.is_dir, r.size, r.id, r.modified, f.is_removed
             FROM files f JOIN revisions r ON f.current_revision_id = r.id
             WHERE f.user_id = ?1 AND r.id > ?2
             ORDER BY r.id ASC",
        )?;
        let rows = stmt.query_map(params![user_id, cursor], metadata_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            let meta = row?;
            if meta.is_removed {
                entries.push(Delta::entry(meta.path.clone(), None));
            } else {
                entries.push(Delta::entry(meta.path.clone(), Some(meta)));
            }
        }
        Ok((entries, new_cursor))
    }

    /// Full-state snapshot: the live children of the root directory. Not
    /// recursive; see DESIGN.md for why this pairs with the reset cursor.
    pub fn current_state(&self, user_id: i64) -> Result<Vec<DeltaEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.hash, f.path, r.name, f.is_dir, r.size, r.id, r.modified, f.is_removed
             FROM files f JOIN revisions r ON f.current_revision_id = r.id
             WHERE f.user_id = ?1 AND f.is_removed = 0 AND f.parent = '/'
             ORDER BY f.path ASC",
        )?;
        let rows = stmt.query_map(params![user_id], metadata_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            let meta = row?;
            entries.push(Delta::entry(meta.path.clone(), Some(meta)));
        }
        Ok(entries)
    }

    pub fn max_revision_id(&self, user_id: i64) -> Result<i64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(id) FROM revisions WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    /* Revision accessors */

    pub fn revision_by_id(&self, rev_id: i64) -> Result<Revision> {
        let revision = self.conn.query_row(
            "SELECT id, file_id, user_id, uuid, size, hash, name, is_dir, modified, created, updated
             FROM revisions WHERE id = ?1",
            params![rev_id],
            revision_from_row,
        )?;
        Ok(revision)
    }

    pub fn current_revision(&self, file: &FileRow) -> Result<Revision> {
        self.revision_by_id(file.current_revision_id)
    }

    /// A specific revision of a specific file; `None` when the id does not
    /// belong to this file and user.
    pub fn revision(&self, file: &FileRow, rev_id: i64) -> Result<Option<Revision>> {
        let revision = self
            .conn
            .query_row(
                "SELECT id, file_id, user_id, uuid, size, hash, name, is_dir, modified, created, updated
                 FROM revisions WHERE id = ?1 AND user_id = ?2 AND file_id = ?3",
                params![rev_id, file.user_id, file.id],
                revision_from_row,
            )
            .optional()?;
        Ok(revision)
    }

    /// Revisions of the same file with equal size and hash are assumed to be
    /// content-identical; `check_upload` uses this to skip transfers.
    pub fn revision_by_size_and_hash(
        &self,
        file_id: i64,
        size: i64,
        hash: &str,
    ) -> Result<Option<Revision>> {
        let revision = self
            .conn
            .query_row(
                "SELECT id, file_id, user_id, uuid, size, hash, name, is_dir, modified, created, updated
                 FROM revisions WHERE file_id = ?1 AND size = ?2 AND hash = ?3
                 ORDER BY id DESC LIMIT 1",
                params![file_id, size, hash],
                revision_from_row,
            )
            .optional()?;
        Ok(revision)
    }

    pub fn revisions_for_file(&self, file_id: i64) -> Result<Vec<Revision>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_id, user_id, uuid, size, hash, name, is_dir, modified, created, updated
             FROM revisions WHERE file_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![file_id], revision_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Wire metadata for one revision, joined with its file row.
    pub fn metadata_for_revision(&self, rev_id: i64) -> Result<Metadata> {
        let meta = self.conn.query_row(
            "SELECT r.hash, f.path, r.name, f.is_dir, r.size, r.id, r.modified, f.is_removed
             FROM files f JOIN revisions r ON f.id = r.file_id
             WHERE r.id = ?1",
            params![rev_id],
            metadata_from_row,
        )?;
        Ok(meta)
    }
}

fn now_ts() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[allow(clippy::too_many_arguments)]
fn insert_revision(
    tx: &Transaction<'_>,
    file_id: i64,
    user_id: i64,
    uuid: &str,
    size: i64,
    hash: &str,
    name: &str,
    is_dir: bool,
    now: i64,
) -> rusqlite::Result<i64> {
    tx.execute(
        "INSERT INTO revisions (file_id, user_id, uuid, size, hash, name, is_dir, modified, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?8)",
        params![file_id, user_id, uuid, size, hash, name, is_dir as i64, now],
    )?;
    Ok(tx.last_insert_rowid())
}

fn tombstone_children(tx: &Transaction<'_>, user_id: i64, parent: &str) -> rusqlite::Result<()> {
    let children: Vec<(i64, String, bool)> = {
        let mut stmt = tx.prepare(
            "SELECT id, path, is_dir FROM files
             WHERE user_id = ?1 AND parent = ?2 AND is_removed = 0",
        )?;
        let rows = stmt.query_map(params![user_id, parent], |row| {
            let is_dir: i64 = row.get(2)?;
            Ok((row.get(0)?, row.get(1)?, is_dir != 0))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    for (id, path, is_dir) in children {
        if is_dir {
            tombstone_children(tx, user_id, &path)?;
        }
        tx.execute("UPDATE files SET is_removed = 1 WHERE id = ?1", params![id])?;
    }
    Ok(())
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRow> {
    let is_dir: i64 = row.get(4)?;
    let is_removed: i64 = row.get(5)?;
    Ok(FileRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        path: row.get(2)?,
        parent: row.get(3)?,
        is_dir: is_dir != 0,
        is_removed: is_removed != 0,
        current_revision_id: row.get(6)?,
    })
}

fn revision_from_row(row: &Row<'_>) -> rusqlite::Result<Revision> {
    let is_dir: i64 = row.get(7)?;
    Ok(Revision {
        id: row.get(0)?,
        file_id: row.get(1)?,
        user_id: row.get(2)?,
        uuid: row.get(3)?,
        size: row.get(4)?,
        hash: row.get(5)?,
        name: row.get(6)?,
        is_dir: is_dir != 0,
        modified: row.get(8)?,
        created: row.get(9)?,
        updated: row.get(10)?,
    })
}

/// Shared column order for every metadata projection:
/// hash, path, name, is_dir, size, rev, modified, is_removed.
fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<Metadata> {
    let is_dir: i64 = row.get(3)?;
    let is_removed: i64 = row.get(7)?;
    Ok(Metadata {
        hash: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        is_dir: is_dir != 0,
        size: row.get(4)?,
        rev: row.get(5)?,
        modified: row.get(6)?,
        is_removed: is_removed != 0,
    })
}
