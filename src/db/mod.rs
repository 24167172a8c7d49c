//! SQLite-backed contact storage.
//!
//! The database lives at `~/.salesdesk/salesdesk.db` unless the config names
//! another path. It is the source of truth for contacts; in-memory views are
//! caches over it.

use std::path::PathBuf;

use rusqlite::Connection;

use crate::types::Config;

pub mod contacts;
pub mod types;
pub use types::*;

pub struct ContactDb {
    conn: Connection,
}

impl ContactDb {
    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database the config points at and apply the schema.
    pub fn open(config: &Config) -> Result<Self, DbError> {
        let path = config
            .database_path()
            .map_err(|_| DbError::HomeDirNotFound)?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL keeps reads from blocking on a pending field write
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::prepare(conn)
    }

    /// Open a private in-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DbError> {
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        // Stage history cascades on contact delete.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }
}
