pub mod models;
pub mod queries;
pub mod store;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Connection lock poisoned")]
    Poisoned,
}

impl DbError {
    /// True for primary-key and unique-index violations, i.e. the row exists.
    pub fn is_duplicate(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// SQLite-backed catalog. One connection, serialized behind a mutex so a
/// single `Database` can be shared by concurrent ingestions.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        // WAL mode for better concurrent read performance
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::migrate(&conn)?;
        Ok(())
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            Self::migrate_v1(conn)?;
        }

        conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: catalog entities, their junctions, and the spin log.
    ///
    /// Track and project ids are content hashes stored as the bit pattern of
    /// the u64 in a signed INTEGER column; see [`to_db_id`].
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS artists (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_artists_name ON artists(name);

            CREATE TABLE IF NOT EXISTS projects (
                id          INTEGER PRIMARY KEY,
                title       TEXT NOT NULL,
                form        TEXT NOT NULL CHECK (form IN ('album', 'ep', 'single', 'compilation')),
                release     TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS tracks (
                id                  INTEGER PRIMARY KEY,
                title               TEXT NOT NULL,
                primary_project_id  INTEGER REFERENCES projects(id),
                created_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS artist_tracks (
                artist_id   INTEGER NOT NULL REFERENCES artists(id),
                track_id    INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                PRIMARY KEY (artist_id, track_id)
            );

            CREATE TABLE IF NOT EXISTS artist_projects (
                artist_id   INTEGER NOT NULL REFERENCES artists(id),
                project_id  INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                PRIMARY KEY (artist_id, project_id)
            );

            CREATE TABLE IF NOT EXISTS project_tracks (
                project_id  INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                track_id    INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                added_at    TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (project_id, track_id)
            );
            CREATE INDEX IF NOT EXISTS idx_project_tracks_track ON project_tracks(track_id);

            CREATE TABLE IF NOT EXISTS spins (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL,
                time        TEXT NOT NULL,
                track_id    INTEGER NOT NULL REFERENCES tracks(id)
            );
            CREATE INDEX IF NOT EXISTS idx_spins_user_time ON spins(user_id, time);
            CREATE INDEX IF NOT EXISTS idx_spins_track ON spins(track_id);
            ",
        )?;
        Ok(())
    }
}

/// Content hashes use the full u64 range; SQLite integers are signed.
pub(crate) fn to_db_id(id: u64) -> i64 {
    id as i64
}

pub(crate) fn from_db_id(id: i64) -> u64 {
    id as u64
}
