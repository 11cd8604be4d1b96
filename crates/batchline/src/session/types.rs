//! Core session entities and their state machines.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque processor configuration, stored verbatim in the ledger and
/// replayed unchanged on resume.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Status of a batch session.
///
/// Transitions: `InProgress -> {Completed, Failed, Paused}` and
/// `Paused -> InProgress` (on resume). `Completed` and `Failed` are
/// terminal; no further writes are permitted except deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
    Paused,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "paused" => Some(SessionStatus::Paused),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single file within a session.
///
/// `Pending -> Processing -> {Completed, Failed, Skipped}`. The only
/// backward edge is `Processing -> Pending`, applied by a session-level
/// pause so an interrupted item is re-run on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
            FileStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FileStatus::Pending),
            "processing" => Some(FileStatus::Processing),
            "completed" => Some(FileStatus::Completed),
            "failed" => Some(FileStatus::Failed),
            "skipped" => Some(FileStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed | FileStatus::Skipped
        )
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable processing state of one file within a session.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub status: FileStatus,
    pub output_paths: Vec<PathBuf>,
    /// Processor-reported metadata for this item, recorded alongside the
    /// terminal status. Empty for pending records.
    pub metadata: Params,
    /// Quick content checksum computed at session creation; `None` if the
    /// file was unreadable at the time.
    pub checksum: Option<String>,
    /// Present iff `status` is `Failed`.
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn pending(path: PathBuf, checksum: Option<String>) -> Self {
        Self {
            path,
            status: FileStatus::Pending,
            output_paths: Vec::new(),
            metadata: Params::new(),
            checksum,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// One durable batch run of one processor over one input set.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub processor_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: Params,
    pub total_files: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub files: Vec<FileRecord>,
}

/// Result of processing a single item, as reported by a processor.
///
/// Expected failure modes (corrupt input, unsupported format) are reported
/// through `failure`, never by panicking.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub success: bool,
    /// True when the item was deliberately left alone (e.g. output already
    /// exists). Recorded as `Skipped` and counted towards completion.
    pub skipped: bool,
    pub output_paths: Vec<PathBuf>,
    pub error_message: Option<String>,
    pub metadata: Params,
}

impl ProcessOutcome {
    pub fn success(output_paths: Vec<PathBuf>) -> Self {
        Self {
            success: true,
            skipped: false,
            output_paths,
            error_message: None,
            metadata: Params::new(),
        }
    }

    pub fn skipped(output_paths: Vec<PathBuf>) -> Self {
        Self {
            success: true,
            skipped: true,
            output_paths,
            error_message: None,
            metadata: Params::new(),
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: false,
            output_paths: Vec::new(),
            error_message: Some(error_message.into()),
            metadata: Params::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Params) -> Self {
        self.metadata = metadata;
        self
    }
}
