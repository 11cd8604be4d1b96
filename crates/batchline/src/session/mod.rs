//! Session entities and the batch session manager.

pub mod error;
pub mod manager;
pub mod types;

pub use error::SessionError;
pub use manager::{CancelToken, SessionManager};
pub use types::{FileRecord, FileStatus, Params, ProcessOutcome, Session, SessionStatus};
