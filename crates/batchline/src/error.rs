//! Crate-level error aggregate.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::ledger::LedgerError;
pub use crate::pipeline::PipelineError;
pub use crate::session::SessionError;

pub type Result<T> = std::result::Result<T, BatchlineError>;

#[derive(Debug, Error)]
pub enum BatchlineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pipeline config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid pipeline config: {message}")]
    Validation { message: String },

    #[error("input path does not exist or is not a directory: {0}")]
    InputPathMissing(PathBuf),
}
