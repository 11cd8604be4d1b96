use std::path::PathBuf;

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::session::types::SessionStatus;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {id} is already {status} and cannot be resumed")]
    AlreadyCompleted { id: String, status: SessionStatus },

    #[error("session {0} is already being processed")]
    Locked(String),

    #[error("session {id} was created for processor '{expected}', not '{actual}'")]
    ProcessorMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
