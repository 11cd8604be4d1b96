//! Durable job ledger for sessions and per-file records.
//!
//! Uses rusqlite (SQLite) with a thread-safe `SqliteLedger` handle. All
//! access is serialized through a `Mutex<Connection>`; WAL mode is enabled
//! so checkpoints and crash recovery behave well. The ledger is the single
//! source of truth for resume decisions — nothing else writes session state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use rusqlite::Connection;

pub mod error;
pub mod migrations;
pub mod session_repo;

pub use error::LedgerError;

use crate::session::types::{FileRecord, FileStatus, Params, Session, SessionStatus};

/// Storage contract for session orchestration.
///
/// `SqliteLedger` is the production implementation; tests substitute
/// counting or failing stubs. Only the `SessionManager` calls the mutating
/// operations during a run.
pub trait Ledger: Send + Sync {
    /// Creates a session with one pending record per path, as a single
    /// durable transaction. Duplicate paths are coalesced to their first
    /// occurrence.
    fn create_session(
        &self,
        processor_id: &str,
        config: &Params,
        paths: &[PathBuf],
    ) -> Result<Session, LedgerError>;

    fn get_session(&self, session_id: &str) -> Result<Option<Session>, LedgerError>;

    /// The most recently updated session still in `InProgress` or `Paused`.
    fn get_latest_incomplete(&self) -> Result<Option<Session>, LedgerError>;

    /// Sessions newest first, optionally filtered by status.
    fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: u32,
    ) -> Result<Vec<Session>, LedgerError>;

    /// Atomically updates one file record and the parent session counters.
    /// `metadata`, when given, is stored verbatim with the record.
    fn update_file_status(
        &self,
        session_id: &str,
        path: &Path,
        status: FileStatus,
        output_paths: Option<&[PathBuf]>,
        metadata: Option<&Params>,
        error_message: Option<&str>,
    ) -> Result<(), LedgerError>;

    /// Forces buffered writes to stable storage. Safe to call redundantly.
    fn checkpoint(&self, session_id: &str) -> Result<(), LedgerError>;

    /// Sets a terminal status. `final_status` must be `Completed` or
    /// `Failed`.
    fn complete_session(
        &self,
        session_id: &str,
        final_status: SessionStatus,
    ) -> Result<(), LedgerError>;

    /// Pauses the session and resets any `Processing` records to `Pending`
    /// so a later resume re-runs the interrupted item.
    fn pause_session(&self, session_id: &str) -> Result<(), LedgerError>;

    /// Re-enters a paused session (`Paused -> InProgress`). A no-op for
    /// sessions already in progress.
    fn reopen_session(&self, session_id: &str) -> Result<(), LedgerError>;

    /// Non-terminal records in original insertion order.
    fn get_pending_files(&self, session_id: &str) -> Result<Vec<FileRecord>, LedgerError>;

    /// Claims exclusive run access to a session for this ledger handle.
    fn acquire_lock(&self, session_id: &str) -> Result<(), LedgerError>;

    fn release_lock(&self, session_id: &str) -> Result<(), LedgerError>;

    /// Deletes a session and its records. Returns false if absent.
    fn delete_session(&self, session_id: &str) -> Result<bool, LedgerError>;

    /// Purges terminal sessions created earlier than `age` ago. Never
    /// touches `InProgress` or `Paused` sessions.
    fn delete_older_than(&self, age: Duration) -> Result<usize, LedgerError>;
}

/// Thread-safe SQLite ledger wrapping a single connection.
///
/// Cloning is cheap (inner `Arc`). All access is serialized through a
/// `Mutex`, which is fine for SQLite (which serializes writes anyway).
/// Run locks are held in process memory, so a crashed runner can never
/// leave a session permanently locked.
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    active_runs: Arc<Mutex<HashSet<String>>>,
}

impl SqliteLedger {
    /// Opens (or creates) the ledger database at the given path and runs
    /// all pending migrations.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Ledger opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            active_runs: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Opens an in-memory ledger for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            active_runs: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Provides locked access to the underlying connection.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Connection) -> Result<T, LedgerError>,
    {
        let mut conn = self.conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
        f(&mut conn)
    }

    pub(crate) fn run_lock(&self, session_id: &str) -> Result<(), LedgerError> {
        let mut active = self
            .active_runs
            .lock()
            .map_err(|_| LedgerError::LockPoisoned)?;
        if !active.insert(session_id.to_string()) {
            return Err(LedgerError::SessionLocked(session_id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn run_unlock(&self, session_id: &str) -> Result<(), LedgerError> {
        let mut active = self
            .active_runs
            .lock()
            .map_err(|_| LedgerError::LockPoisoned)?;
        active.remove(session_id);
        Ok(())
    }
}

/// Returns the canonical ledger path: `~/.batchline/data/batchline.db`.
pub fn default_ledger_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".batchline").join("data").join("batchline.db"))
}
