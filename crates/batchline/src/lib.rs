//! Durable batch session orchestration.
//!
//! Batches of files run through pluggable processors with progress recorded
//! in a SQLite ledger, so interrupted runs can be resumed without redoing
//! finished work. Multi-step pipelines chain processor outputs with one
//! session per step.

pub mod checksum;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod processor;
pub mod progress;
pub mod scan;
pub mod session;

pub use error::{BatchlineError, ConfigError, Result};
pub use ledger::{default_ledger_path, Ledger, LedgerError, SqliteLedger};
pub use pipeline::{
    PipelineConfig, PipelineEngine, PipelineError, PipelineRun, PipelineStatus, StepOutcome,
};
pub use processor::{ParamSpec, Processor, ProcessorRegistry};
pub use progress::{LogProgress, NoopProgress, ProgressReporter};
pub use scan::scan_files;
pub use session::{
    CancelToken, FileRecord, FileStatus, Params, ProcessOutcome, Session, SessionError,
    SessionManager, SessionStatus,
};
