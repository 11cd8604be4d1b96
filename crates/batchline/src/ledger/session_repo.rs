//! SQLite implementation of the `Ledger` contract.
//!
//! Row mapping and all session/file-record SQL lives here. Counter updates
//! ride in the same transaction as the record update, so a crash between
//! statements can never leave the two out of step.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use crate::checksum::quick_checksum;
use crate::session::types::{FileRecord, FileStatus, Params, Session, SessionStatus};

use super::error::LedgerError;
use super::{Ledger, SqliteLedger};

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_session_status(raw: &str) -> Result<SessionStatus, LedgerError> {
    SessionStatus::parse(raw)
        .ok_or_else(|| LedgerError::Corrupt(format!("unknown session status '{}'", raw)))
}

fn parse_file_status(raw: &str) -> Result<FileStatus, LedgerError> {
    FileStatus::parse(raw)
        .ok_or_else(|| LedgerError::Corrupt(format!("unknown file status '{}'", raw)))
}

fn file_record_from_row(row: &Row<'_>) -> Result<FileRecord, LedgerError> {
    let path: String = row.get("file_path")?;
    let status: String = row.get("status")?;
    let output_paths_json: Option<String> = row.get("output_paths_json")?;
    let metadata_json: Option<String> = row.get("metadata_json")?;
    let started_at: Option<String> = row.get("started_at")?;
    let finished_at: Option<String> = row.get("finished_at")?;

    let output_paths: Vec<PathBuf> = match output_paths_json {
        Some(json) => serde_json::from_str::<Vec<String>>(&json)
            .map_err(|e| LedgerError::Corrupt(format!("bad output_paths_json: {}", e)))?
            .into_iter()
            .map(PathBuf::from)
            .collect(),
        None => Vec::new(),
    };

    let metadata: Params = match metadata_json {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| LedgerError::Corrupt(format!("bad metadata_json: {}", e)))?,
        None => Params::new(),
    };

    Ok(FileRecord {
        path: PathBuf::from(path),
        status: parse_file_status(&status)?,
        output_paths,
        metadata,
        checksum: row.get("checksum")?,
        error_message: row.get("error_message")?,
        started_at: started_at.as_deref().map(parse_timestamp).transpose()?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn session_from_row(row: &Row<'_>, files: Vec<FileRecord>) -> Result<Session, LedgerError> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let config_json: String = row.get("config_json")?;

    let config: Params = serde_json::from_str(&config_json)
        .map_err(|e| LedgerError::Corrupt(format!("bad config_json: {}", e)))?;

    Ok(Session {
        id: row.get("id")?,
        processor_id: row.get("processor_id")?,
        status: parse_session_status(&status)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        config,
        total_files: row.get("total_files")?,
        completed_count: row.get("completed_count")?,
        failed_count: row.get("failed_count")?,
        files,
    })
}

fn load_files(tx: &Transaction<'_>, session_id: &str) -> Result<Vec<FileRecord>, LedgerError> {
    let mut stmt =
        tx.prepare("SELECT * FROM session_files WHERE session_id = ?1 ORDER BY id")?;
    let mut rows = stmt.query(params![session_id])?;
    let mut files = Vec::new();
    while let Some(row) = rows.next()? {
        files.push(file_record_from_row(row)?);
    }
    Ok(files)
}

fn current_status(
    tx: &Transaction<'_>,
    session_id: &str,
) -> Result<SessionStatus, LedgerError> {
    let raw: Option<String> = tx
        .query_row(
            "SELECT status FROM sessions WHERE id = ?1",
            params![session_id],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => parse_session_status(&raw),
        None => Err(LedgerError::SessionNotFound(session_id.to_string())),
    }
}

impl Ledger for SqliteLedger {
    fn create_session(
        &self,
        processor_id: &str,
        config: &Params,
        paths: &[PathBuf],
    ) -> Result<Session, LedgerError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let config_json = serde_json::to_string(config)
            .map_err(|e| LedgerError::Corrupt(format!("unserializable config: {}", e)))?;

        // Coalesce duplicate paths to their first occurrence, preserving
        // insertion order so resume stays deterministic.
        let mut seen = std::collections::HashSet::new();
        let unique_paths: Vec<&PathBuf> =
            paths.iter().filter(|p| seen.insert(p.as_path())).collect();
        let total = unique_paths.len() as u64;

        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let exists: Option<String> = tx
                .query_row(
                    "SELECT id FROM sessions WHERE id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(LedgerError::DuplicateSession(session_id.clone()));
            }

            tx.execute(
                "INSERT INTO sessions (id, created_at, updated_at, status, processor_id,
                 config_json, total_files)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session_id,
                    now_str,
                    now_str,
                    SessionStatus::InProgress.as_str(),
                    processor_id,
                    config_json,
                    total,
                ],
            )?;

            let mut files = Vec::with_capacity(unique_paths.len());
            for path in &unique_paths {
                let checksum = quick_checksum(path);
                tx.execute(
                    "INSERT INTO session_files (session_id, file_path, status, checksum)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        session_id,
                        path.to_string_lossy(),
                        FileStatus::Pending.as_str(),
                        checksum,
                    ],
                )?;
                files.push(FileRecord::pending((*path).clone(), checksum));
            }

            tx.commit()?;

            Ok(Session {
                id: session_id.clone(),
                processor_id: processor_id.to_string(),
                status: SessionStatus::InProgress,
                created_at: now,
                updated_at: now,
                config: config.clone(),
                total_files: total,
                completed_count: 0,
                failed_count: 0,
                files,
            })
        })
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>, LedgerError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let session = {
                let mut stmt = tx.prepare("SELECT * FROM sessions WHERE id = ?1")?;
                let mut rows = stmt.query(params![session_id])?;
                match rows.next()? {
                    Some(row) => {
                        // Files are loaded after the session row; same
                        // transaction, so the view is consistent.
                        let session = session_from_row(row, Vec::new())?;
                        Some(session)
                    }
                    None => None,
                }
            };
            let session = match session {
                Some(mut s) => {
                    s.files = load_files(&tx, session_id)?;
                    Some(s)
                }
                None => None,
            };
            tx.commit()?;
            Ok(session)
        })
    }

    fn get_latest_incomplete(&self) -> Result<Option<Session>, LedgerError> {
        let id: Option<String> = self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT id FROM sessions
                     WHERE status IN (?1, ?2)
                     ORDER BY updated_at DESC
                     LIMIT 1",
                    params![
                        SessionStatus::InProgress.as_str(),
                        SessionStatus::Paused.as_str()
                    ],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(id)
        })?;

        match id {
            Some(id) => self.get_session(&id),
            None => Ok(None),
        }
    }

    fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: u32,
    ) -> Result<Vec<Session>, LedgerError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut sessions = {
                let (sql, status_param) = match status {
                    Some(s) => (
                        "SELECT * FROM sessions WHERE status = ?1
                         ORDER BY created_at DESC LIMIT ?2",
                        Some(s.as_str()),
                    ),
                    None => (
                        "SELECT * FROM sessions WHERE ?1 IS NULL
                         ORDER BY created_at DESC LIMIT ?2",
                        None,
                    ),
                };
                let mut stmt = tx.prepare(sql)?;
                let mut rows = stmt.query(params![status_param, limit])?;
                let mut sessions = Vec::new();
                while let Some(row) = rows.next()? {
                    sessions.push(session_from_row(row, Vec::new())?);
                }
                sessions
            };
            for session in &mut sessions {
                session.files = load_files(&tx, &session.id)?;
            }
            tx.commit()?;
            Ok(sessions)
        })
    }

    fn update_file_status(
        &self,
        session_id: &str,
        path: &Path,
        status: FileStatus,
        output_paths: Option<&[PathBuf]>,
        metadata: Option<&Params>,
        error_message: Option<&str>,
    ) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339();
        let output_paths_json = match output_paths {
            Some(paths) => {
                let strings: Vec<String> =
                    paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
                Some(serde_json::to_string(&strings).map_err(|e| {
                    LedgerError::Corrupt(format!("unserializable output paths: {}", e))
                })?)
            }
            None => None,
        };
        let metadata_json = match metadata.filter(|m| !m.is_empty()) {
            Some(m) => Some(serde_json::to_string(m).map_err(|e| {
                LedgerError::Corrupt(format!("unserializable metadata: {}", e))
            })?),
            None => None,
        };

        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let changed = if status == FileStatus::Processing {
                tx.execute(
                    "UPDATE session_files SET status = ?1, started_at = ?2
                     WHERE session_id = ?3 AND file_path = ?4",
                    params![status.as_str(), now, session_id, path.to_string_lossy()],
                )?
            } else {
                tx.execute(
                    "UPDATE session_files
                     SET status = ?1, error_message = ?2, output_paths_json = ?3,
                         metadata_json = ?4, finished_at = ?5
                     WHERE session_id = ?6 AND file_path = ?7",
                    params![
                        status.as_str(),
                        error_message,
                        output_paths_json,
                        metadata_json,
                        now,
                        session_id,
                        path.to_string_lossy()
                    ],
                )?
            };

            if changed == 0 {
                return Err(LedgerError::RecordNotFound {
                    session_id: session_id.to_string(),
                    path: path.to_path_buf(),
                });
            }

            match status {
                FileStatus::Completed | FileStatus::Skipped => {
                    tx.execute(
                        "UPDATE sessions
                         SET completed_count = completed_count + 1, updated_at = ?1
                         WHERE id = ?2",
                        params![now, session_id],
                    )?;
                }
                FileStatus::Failed => {
                    tx.execute(
                        "UPDATE sessions
                         SET failed_count = failed_count + 1, updated_at = ?1
                         WHERE id = ?2",
                        params![now, session_id],
                    )?;
                }
                FileStatus::Pending | FileStatus::Processing => {
                    tx.execute(
                        "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                        params![now, session_id],
                    )?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    fn checkpoint(&self, session_id: &str) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                params![now, session_id],
            )?;
            // Flush the WAL so the updated state survives a crash. A no-op
            // outside WAL mode (e.g. in-memory test databases).
            conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
            Ok(())
        })
    }

    fn complete_session(
        &self,
        session_id: &str,
        final_status: SessionStatus,
    ) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let current = current_status(&tx, session_id)?;
            if current.is_terminal() || !final_status.is_terminal() {
                return Err(LedgerError::InvalidTransition {
                    session_id: session_id.to_string(),
                    from: current.to_string(),
                    to: final_status.to_string(),
                });
            }
            tx.execute(
                "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![final_status.as_str(), now, session_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn pause_session(&self, session_id: &str) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let current = current_status(&tx, session_id)?;
            if current.is_terminal() {
                return Err(LedgerError::InvalidTransition {
                    session_id: session_id.to_string(),
                    from: current.to_string(),
                    to: SessionStatus::Paused.to_string(),
                });
            }

            // Reset in-flight items so resume re-runs them.
            tx.execute(
                "UPDATE session_files SET status = ?1, started_at = NULL
                 WHERE session_id = ?2 AND status = ?3",
                params![
                    FileStatus::Pending.as_str(),
                    session_id,
                    FileStatus::Processing.as_str()
                ],
            )?;
            tx.execute(
                "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![SessionStatus::Paused.as_str(), now, session_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn reopen_session(&self, session_id: &str) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let current = current_status(&tx, session_id)?;
            if current.is_terminal() {
                return Err(LedgerError::InvalidTransition {
                    session_id: session_id.to_string(),
                    from: current.to_string(),
                    to: SessionStatus::InProgress.to_string(),
                });
            }
            tx.execute(
                "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![SessionStatus::InProgress.as_str(), now, session_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn get_pending_files(&self, session_id: &str) -> Result<Vec<FileRecord>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM session_files
                 WHERE session_id = ?1 AND status IN (?2, ?3)
                 ORDER BY id",
            )?;
            let mut rows = stmt.query(params![
                session_id,
                FileStatus::Pending.as_str(),
                FileStatus::Processing.as_str()
            ])?;
            let mut files = Vec::new();
            while let Some(row) = rows.next()? {
                files.push(file_record_from_row(row)?);
            }
            Ok(files)
        })
    }

    fn acquire_lock(&self, session_id: &str) -> Result<(), LedgerError> {
        self.run_lock(session_id)
    }

    fn release_lock(&self, session_id: &str) -> Result<(), LedgerError> {
        self.run_unlock(session_id)
    }

    fn delete_session(&self, session_id: &str) -> Result<bool, LedgerError> {
        self.with_conn(|conn| {
            // ON DELETE CASCADE removes the file records.
            let deleted = conn.execute(
                "DELETE FROM sessions WHERE id = ?1",
                params![session_id],
            )?;
            Ok(deleted > 0)
        })
    }

    fn delete_older_than(&self, age: Duration) -> Result<usize, LedgerError> {
        let cutoff = (Utc::now() - age).to_rfc3339();
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM sessions
                 WHERE created_at < ?1 AND status IN (?2, ?3)",
                params![
                    cutoff,
                    SessionStatus::Completed.as_str(),
                    SessionStatus::Failed.as_str()
                ],
            )?;
            Ok(deleted)
        })
    }
}
