//! Durable persistence for batch state and companion OAuth tokens, so a
//! batch mid-upload can be restored after a process restart
//! (spec §4.H, extended beyond the original browser-session-only restore;
//! see `DESIGN.md`).
//!
//! Grounded on the teacher's `database::Database`: an `r2d2`-pooled
//! `rusqlite` connection, `CREATE TABLE IF NOT EXISTS` setup run eagerly,
//! then whatever the `conveyor_migrations` crate's embedded `.sql` files
//! add on top, tracked via SQLite's `PRAGMA user_version`.

mod error;

use std::fmt;
use std::path::{Path, PathBuf};

use conveyor_migrations::Migrations;
use log::debug;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, Result as SqliteResult};

pub use self::error::{Error, ErrorKind, Result};

use crate::types::BatchId;
use crate::util::temporal::now;

#[derive(Debug)]
pub enum Source {
    File(PathBuf),
    /// In-memory database, for tests: each `Database::new` call with this
    /// variant gets its own isolated pool.
    Memory,
}

impl Source {
    fn manager(&self) -> SqliteConnectionManager {
        match self {
            Source::File(path) => SqliteConnectionManager::file(path),
            Source::Memory => SqliteConnectionManager::memory(),
        }
    }
}

/// A persisted batch: the serialized `BatchState` plus which pipeline
/// step it last reached.
#[derive(Clone, Debug)]
pub struct PersistedBatch {
    pub batch_id: BatchId,
    pub step: usize,
    pub state_json: String,
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database {{ pool: {:?} }}", self.pool.state())
    }
}

impl Database {
    pub fn new(source: &Source) -> Result<Database> {
        let pool = Pool::new(source.manager())?;
        let database = Database { pool };
        database.setup()?;
        Ok(database)
    }

    pub fn open(path: &Path) -> Result<Database> {
        Self::new(&Source::File(path.to_path_buf()))
    }

    fn setup(&self) -> Result<()> {
        let conn = self.pool.get()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS batches (
                batch_id   TEXT PRIMARY KEY,
                step       INTEGER NOT NULL DEFAULT 0,
                state_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            (),
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS companion_tokens (
                companion_url TEXT NOT NULL,
                provider      TEXT NOT NULL,
                token         TEXT NOT NULL,
                expires_at    TEXT,
                PRIMARY KEY (companion_url, provider)
            )",
            (),
        )?;

        Self::run_migrations(&conn)?;
        Ok(())
    }

    fn current_schema_version(conn: &rusqlite::Connection) -> Result<usize> {
        conn.query_row("PRAGMA user_version", (), |row| row.get::<_, i64>(0))
            .map(|v| v as usize)
            .map_err(Into::into)
    }

    fn set_schema_version(conn: &rusqlite::Connection, version: usize) -> Result<()> {
        conn.execute(&format!("PRAGMA user_version = {}", version), ())?;
        Ok(())
    }

    /// Applies every embedded migration whose index is at or past the
    /// current schema version, in filename order.
    fn run_migrations(conn: &rusqlite::Connection) -> Result<()> {
        let current = Self::current_schema_version(conn)?;
        let mut version = current;
        for (i, (filename, contents)) in Migrations::get_all().enumerate() {
            if i < current {
                continue;
            }
            debug!("migration: running {}@{}", filename, i);
            conn.execute_batch(&contents)?;
            version = i + 1;
        }
        if version != current {
            Self::set_schema_version(conn, version)?;
        }
        Ok(())
    }

    /// Insert or update a batch's persisted snapshot.
    pub fn upsert_batch(&self, batch_id: &BatchId, step: usize, state_json: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let now = now().to_rfc3339();
        conn.execute(
            "INSERT INTO batches (batch_id, step, state_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(batch_id) DO UPDATE SET
                step = excluded.step,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at",
            (batch_id.to_string(), step as i64, state_json, now),
        )?;
        Ok(())
    }

    pub fn get_batch(&self, batch_id: &BatchId) -> Result<Option<PersistedBatch>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT batch_id, step, state_json FROM batches WHERE batch_id = ?1",
            [batch_id.to_string()],
            |row| {
                Ok(PersistedBatch {
                    batch_id: BatchId(row.get(0)?),
                    step: row.get::<_, i64>(1)? as usize,
                    state_json: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// All batches persisted from a prior run, for restore on startup
    /// (spec §4.H, resumable batches).
    pub fn get_all_batches(&self) -> Result<Vec<PersistedBatch>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT batch_id, step, state_json FROM batches ORDER BY created_at")?;
        let rows = stmt.query_map((), |row| {
            Ok(PersistedBatch {
                batch_id: BatchId(row.get(0)?),
                step: row.get::<_, i64>(1)? as usize,
                state_json: row.get(2)?,
            })
        })?;
        rows.collect::<SqliteResult<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn delete_batch(&self, batch_id: &BatchId) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM batches WHERE batch_id = ?1", [batch_id.to_string()])?;
        Ok(())
    }

    /// Stores (or replaces) a companion-issued OAuth token (spec §4.K).
    pub fn upsert_companion_token(
        &self,
        companion_url: &str,
        provider: &str,
        token: &str,
        expires_at: Option<&str>,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO companion_tokens (companion_url, provider, token, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(companion_url, provider) DO UPDATE SET
                token = excluded.token,
                expires_at = excluded.expires_at",
            (companion_url, provider, token, expires_at),
        )?;
        Ok(())
    }

    pub fn get_companion_token(&self, companion_url: &str, provider: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT token FROM companion_tokens WHERE companion_url = ?1 AND provider = ?2",
            [companion_url, provider],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Removes every stored companion token (spec §4.K, `logout()`).
    pub fn clear_companion_tokens(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM companion_tokens", ())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn memory_db() -> Database {
        Database::new(&Source::Memory).unwrap()
    }

    #[test]
    fn upsert_and_fetch_a_batch() {
        let db = memory_db();
        let id = BatchId("batch-1".into());
        db.upsert_batch(&id, 1, "{}").unwrap();

        let fetched = db.get_batch(&id).unwrap().unwrap();
        assert_eq!(fetched.step, 1);
        assert_eq!(fetched.state_json, "{}");
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let db = memory_db();
        let id = BatchId("batch-1".into());
        db.upsert_batch(&id, 0, "{}").unwrap();
        db.upsert_batch(&id, 2, "{\"x\":1}").unwrap();

        let fetched = db.get_batch(&id).unwrap().unwrap();
        assert_eq!(fetched.step, 2);
        assert_eq!(fetched.state_json, "{\"x\":1}");
    }

    #[test]
    fn delete_batch_removes_it() {
        let db = memory_db();
        let id = BatchId("batch-1".into());
        db.upsert_batch(&id, 0, "{}").unwrap();
        db.delete_batch(&id).unwrap();
        assert!(db.get_batch(&id).unwrap().is_none());
    }

    #[test]
    fn get_all_batches_returns_every_row() {
        let db = memory_db();
        db.upsert_batch(&BatchId("b1".into()), 0, "{}").unwrap();
        db.upsert_batch(&BatchId("b2".into()), 0, "{}").unwrap();
        assert_eq!(db.get_all_batches().unwrap().len(), 2);
    }

    #[test]
    fn companion_tokens_round_trip_and_clear() {
        let db = memory_db();
        db.upsert_companion_token("https://companion.example.com", "google-drive", "tok", None)
            .unwrap();
        assert_eq!(
            db.get_companion_token("https://companion.example.com", "google-drive")
                .unwrap(),
            Some("tok".to_owned())
        );
        db.clear_companion_tokens().unwrap();
        assert_eq!(
            db.get_companion_token("https://companion.example.com", "google-drive")
                .unwrap(),
            None
        );
    }
}
