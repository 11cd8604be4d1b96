//! Ledger error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the durable job ledger.
///
/// `Sqlite` and `Io` are storage-layer failures and are fatal to the
/// current run; the remaining variants describe rejected operations and
/// leave the ledger unmodified.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The connection lock was poisoned.
    #[error("Ledger lock poisoned")]
    LockPoisoned,

    /// A session id collision on creation. Practically unreachable with
    /// random ids.
    #[error("Session id already exists: {0}")]
    DuplicateSession(String),

    /// The requested session id does not exist.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The (session, path) pair does not exist.
    #[error("No record for '{path}' in session {session_id}")]
    RecordNotFound { session_id: String, path: PathBuf },

    /// A status write that the session state machine forbids.
    #[error("Invalid transition for session {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: String,
        from: String,
        to: String,
    },

    /// Another runner currently holds this session.
    #[error("Session is locked by another runner: {0}")]
    SessionLocked(String),

    /// A stored row could not be decoded.
    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}
