//! Batch session orchestration: checkpointing, interruption, resume.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, info_span, warn};

use crate::ledger::{Ledger, LedgerError};
use crate::processor::Processor;
use crate::progress::{NoopProgress, ProgressReporter};

use super::error::SessionError;
use super::types::{FileStatus, Params, ProcessOutcome, Session, SessionStatus};

/// Cooperative cancellation flag, observed between items.
///
/// Cloning shares the flag. The manager never installs signal handlers
/// itself; callers that want Ctrl-C to pause a run wire it up explicitly
/// via [`CancelToken::install_ctrlc_handler`].
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Routes SIGINT/SIGTERM to this token. Can only be installed once per
    /// process; a second call returns `ctrlc::Error::MultipleHandlers`.
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = self.flag.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
    }
}

/// Runs batches of files through a processor with durable progress.
///
/// Single-threaded by design: items are processed one at a time in record
/// order, with the ledger updated around every item. A run can be paused
/// via its `CancelToken` and later resumed; resume re-reads everything it
/// needs from the ledger, including the original processor config.
pub struct SessionManager {
    ledger: Arc<dyn Ledger>,
    checkpoint_interval: u64,
    progress: Arc<dyn ProgressReporter>,
}

impl SessionManager {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            checkpoint_interval: 100,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Checkpoint after every `interval` processed items. Values below 1
    /// are clamped to 1.
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs (or resumes) a batch of `input_paths` through `processor`.
    ///
    /// With `resume_session_id` set, `input_paths` and `config` are ignored
    /// and the session's stored record set and config are used instead.
    /// Returns the session in its final state: `Completed`, `Failed` (every
    /// item failed), or `Paused` (cancelled mid-run).
    pub fn run_batch(
        &self,
        processor: &dyn Processor,
        input_paths: &[std::path::PathBuf],
        output_dir: &Path,
        config: &Params,
        resume_session_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Session, SessionError> {
        let session = match resume_session_id {
            Some(id) => {
                let session = self
                    .ledger
                    .get_session(id)?
                    .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
                if session.status.is_terminal() {
                    return Err(SessionError::AlreadyCompleted {
                        id: session.id,
                        status: session.status,
                    });
                }
                if session.processor_id != processor.name() {
                    return Err(SessionError::ProcessorMismatch {
                        id: session.id,
                        expected: session.processor_id,
                        actual: processor.name().to_string(),
                    });
                }
                if session.status == SessionStatus::Paused {
                    self.ledger.reopen_session(id)?;
                }
                info!(session_id = %session.id, "Resuming session");
                session
            }
            None => self
                .ledger
                .create_session(processor.name(), config, input_paths)?,
        };

        match self.ledger.acquire_lock(&session.id) {
            Ok(()) => {}
            Err(LedgerError::SessionLocked(id)) => return Err(SessionError::Locked(id)),
            Err(e) => return Err(e.into()),
        }

        let result = self.run_locked(processor, &session, output_dir, cancel);
        let released = self.ledger.release_lock(&session.id);
        let session = result?;
        released?;
        Ok(session)
    }

    fn run_locked(
        &self,
        processor: &dyn Processor,
        session: &Session,
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Session, SessionError> {
        let span = info_span!("batch", session_id = %session.id, processor = processor.name());
        let _guard = span.enter();

        std::fs::create_dir_all(output_dir).map_err(|e| SessionError::OutputDir {
            path: output_dir.to_path_buf(),
            source: e,
        })?;

        let pending = self.ledger.get_pending_files(&session.id)?;
        let already_done = session.total_files - pending.len() as u64;
        let label = if already_done > 0 {
            format!(
                "Resuming: {} of {} items remaining",
                pending.len(),
                session.total_files
            )
        } else {
            format!("Processing {} items", session.total_files)
        };
        self.progress.start(pending.len() as u64, &label);

        let mut since_checkpoint = 0u64;
        for record in &pending {
            if cancel.is_cancelled() {
                info!(path = %record.path.display(), "Cancellation requested, pausing session");
                self.ledger.checkpoint(&session.id)?;
                self.ledger.pause_session(&session.id)?;
                self.progress.finish();
                return self.fetch(&session.id);
            }

            self.ledger.update_file_status(
                &session.id,
                &record.path,
                FileStatus::Processing,
                None,
                None,
                None,
            )?;

            let outcome = run_one(processor, &record.path, output_dir, &session.config);

            if outcome.success {
                let status = if outcome.skipped {
                    FileStatus::Skipped
                } else {
                    FileStatus::Completed
                };
                debug!(path = %record.path.display(), status = %status, "Item done");
                self.ledger.update_file_status(
                    &session.id,
                    &record.path,
                    status,
                    Some(&outcome.output_paths),
                    Some(&outcome.metadata),
                    None,
                )?;
            } else {
                let message = outcome
                    .error_message
                    .as_deref()
                    .unwrap_or("processor reported failure without a message");
                warn!(path = %record.path.display(), error = message, "Item failed");
                self.ledger.update_file_status(
                    &session.id,
                    &record.path,
                    FileStatus::Failed,
                    None,
                    Some(&outcome.metadata),
                    Some(message),
                )?;
            }

            self.progress.advance(1);
            since_checkpoint += 1;
            if since_checkpoint >= self.checkpoint_interval {
                self.ledger.checkpoint(&session.id)?;
                since_checkpoint = 0;
            }
        }

        let current = self.fetch(&session.id)?;
        let final_status = if current.total_files > 0 && current.failed_count == current.total_files
        {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };
        self.ledger.complete_session(&session.id, final_status)?;
        self.progress.finish();

        info!(
            status = %final_status,
            completed = current.completed_count,
            failed = current.failed_count,
            total = current.total_files,
            "Batch finished"
        );

        self.fetch(&session.id)
    }

    fn fetch(&self, session_id: &str) -> Result<Session, SessionError> {
        self.ledger
            .get_session(session_id)?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// The session a `resume_latest` call would pick up, if any.
    pub fn get_resumable_session(&self) -> Result<Option<Session>, SessionError> {
        Ok(self.ledger.get_latest_incomplete()?)
    }

    /// Resumes the most recently updated incomplete session, if there is
    /// one and it belongs to `processor`.
    pub fn resume_latest(
        &self,
        processor: &dyn Processor,
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<Session>, SessionError> {
        let Some(session) = self.ledger.get_latest_incomplete()? else {
            return Ok(None);
        };
        let resumed = self.run_batch(
            processor,
            &[],
            output_dir,
            &session.config,
            Some(&session.id),
            cancel,
        )?;
        Ok(Some(resumed))
    }

    pub fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: u32,
    ) -> Result<Vec<Session>, SessionError> {
        Ok(self.ledger.list_sessions(status, limit)?)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self.ledger.delete_session(session_id)?)
    }

    /// Purges terminal sessions older than `age`. Returns how many were
    /// removed.
    pub fn clean_old_sessions(&self, age: Duration) -> Result<usize, SessionError> {
        let removed = self.ledger.delete_older_than(age)?;
        if removed > 0 {
            info!(removed, "Purged old sessions");
        }
        Ok(removed)
    }
}

/// Invokes the processor, converting a panic into an item failure so one
/// bad file cannot take down the whole batch.
fn run_one(
    processor: &dyn Processor,
    input: &Path,
    output_dir: &Path,
    params: &Params,
) -> ProcessOutcome {
    match catch_unwind(AssertUnwindSafe(|| {
        processor.process(input, output_dir, params)
    })) {
        Ok(outcome) => outcome,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            ProcessOutcome::failure(format!("processor panicked: {}", detail))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SqliteLedger;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records every call; fails, skips, or panics on designated paths.
    /// Can cancel a shared token after a fixed number of calls.
    struct ScriptedProcessor {
        calls: Mutex<Vec<PathBuf>>,
        seen_params: Mutex<Vec<Params>>,
        fail_on: HashSet<PathBuf>,
        skip_on: HashSet<PathBuf>,
        panic_on: HashSet<PathBuf>,
        cancel_after: Option<(u64, CancelToken)>,
    }

    impl ScriptedProcessor {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                seen_params: Mutex::new(Vec::new()),
                fail_on: HashSet::new(),
                skip_on: HashSet::new(),
                panic_on: HashSet::new(),
                cancel_after: None,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Processor for ScriptedProcessor {
        fn name(&self) -> &str {
            "scripted"
        }

        fn process(&self, input: &Path, output_dir: &Path, params: &Params) -> ProcessOutcome {
            self.calls.lock().unwrap().push(input.to_path_buf());
            self.seen_params.lock().unwrap().push(params.clone());

            if let Some((after, token)) = &self.cancel_after {
                if self.call_count() as u64 >= *after {
                    token.cancel();
                }
            }

            if self.panic_on.contains(input) {
                panic!("scripted panic for {}", input.display());
            }
            if self.fail_on.contains(input) {
                return ProcessOutcome::failure("scripted failure");
            }
            if self.skip_on.contains(input) {
                return ProcessOutcome::skipped(Vec::new());
            }
            let out = output_dir.join(input.file_name().unwrap_or_default());
            ProcessOutcome::success(vec![out])
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn manager(ledger: &Arc<SqliteLedger>) -> SessionManager {
        SessionManager::new(ledger.clone())
    }

    fn test_ledger() -> Arc<SqliteLedger> {
        Arc::new(SqliteLedger::open_in_memory().unwrap())
    }

    #[test]
    fn test_run_batch_all_success() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let processor = ScriptedProcessor::new();

        let session = manager(&ledger)
            .run_batch(
                &processor,
                &paths(&["/in/a", "/in/b", "/in/c"]),
                out.path(),
                &Params::new(),
                None,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.completed_count, 3);
        assert_eq!(session.failed_count, 0);
        assert_eq!(processor.call_count(), 3);
        assert!(session
            .files
            .iter()
            .all(|f| f.status == FileStatus::Completed && !f.output_paths.is_empty()));
    }

    #[test]
    fn test_processor_metadata_is_persisted() {
        struct MeteringProcessor;

        impl Processor for MeteringProcessor {
            fn name(&self) -> &str {
                "metering"
            }

            fn process(&self, input: &Path, output_dir: &Path, _params: &Params) -> ProcessOutcome {
                let out = output_dir.join(input.file_name().unwrap_or_default());
                let mut metadata = Params::new();
                metadata.insert("peak_db".to_string(), serde_json::json!(-0.3));
                ProcessOutcome::success(vec![out]).with_metadata(metadata)
            }
        }

        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();

        let session = manager(&ledger)
            .run_batch(
                &MeteringProcessor,
                &paths(&["/in/a"]),
                out.path(),
                &Params::new(),
                None,
                &CancelToken::new(),
            )
            .unwrap();

        // Metadata must survive the round trip through the ledger, not just
        // live on the in-memory outcome.
        let stored = ledger.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.files[0].status, FileStatus::Completed);
        assert_eq!(
            stored.files[0].metadata.get("peak_db"),
            Some(&serde_json::json!(-0.3))
        );
    }

    #[test]
    fn test_run_batch_mixed_failures_still_completes() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let mut processor = ScriptedProcessor::new();
        processor.fail_on.insert(PathBuf::from("/in/b"));

        let session = manager(&ledger)
            .run_batch(
                &processor,
                &paths(&["/in/a", "/in/b", "/in/c"]),
                out.path(),
                &Params::new(),
                None,
                &CancelToken::new(),
            )
            .unwrap();

        // Item failures do not fail the session unless all items failed.
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.completed_count, 2);
        assert_eq!(session.failed_count, 1);
        assert_eq!(session.files[1].status, FileStatus::Failed);
        assert_eq!(session.files[1].error_message.as_deref(), Some("scripted failure"));
    }

    #[test]
    fn test_run_batch_all_failed_marks_session_failed() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let mut processor = ScriptedProcessor::new();
        processor.fail_on.insert(PathBuf::from("/in/a"));
        processor.fail_on.insert(PathBuf::from("/in/b"));

        let session = manager(&ledger)
            .run_batch(
                &processor,
                &paths(&["/in/a", "/in/b"]),
                out.path(),
                &Params::new(),
                None,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.failed_count, 2);
    }

    #[test]
    fn test_run_batch_empty_input_completes() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let processor = ScriptedProcessor::new();

        let session = manager(&ledger)
            .run_batch(&processor, &[], out.path(), &Params::new(), None, &CancelToken::new())
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.total_files, 0);
        assert_eq!(processor.call_count(), 0);
    }

    #[test]
    fn test_skipped_items_count_towards_completion() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let mut processor = ScriptedProcessor::new();
        processor.skip_on.insert(PathBuf::from("/in/a"));

        let session = manager(&ledger)
            .run_batch(
                &processor,
                &paths(&["/in/a", "/in/b"]),
                out.path(),
                &Params::new(),
                None,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.completed_count, 2);
        assert_eq!(session.files[0].status, FileStatus::Skipped);
    }

    #[test]
    fn test_panic_is_recorded_as_item_failure() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let mut processor = ScriptedProcessor::new();
        processor.panic_on.insert(PathBuf::from("/in/b"));

        let session = manager(&ledger)
            .run_batch(
                &processor,
                &paths(&["/in/a", "/in/b", "/in/c"]),
                out.path(),
                &Params::new(),
                None,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.failed_count, 1);
        let failed = &session.files[1];
        assert_eq!(failed.status, FileStatus::Failed);
        assert!(failed.error_message.as_ref().unwrap().contains("panicked"));
        // The items after the panic were still processed.
        assert_eq!(session.files[2].status, FileStatus::Completed);
    }

    #[test]
    fn test_cancel_pauses_and_resume_processes_exactly_the_rest() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let mut processor = ScriptedProcessor::new();
        processor.cancel_after = Some((5, cancel.clone()));

        let inputs: Vec<PathBuf> = (0..10).map(|i| PathBuf::from(format!("/in/f{}", i))).collect();

        let session = manager(&ledger)
            .run_batch(&processor, &inputs, out.path(), &Params::new(), None, &cancel)
            .unwrap();

        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.completed_count, 5);
        assert_eq!(processor.call_count(), 5);

        // Resume with a fresh token runs only the remaining five, in order.
        let mut resumed_processor = ScriptedProcessor::new();
        resumed_processor.cancel_after = None;
        let resumed = manager(&ledger)
            .run_batch(
                &resumed_processor,
                &[],
                out.path(),
                &Params::new(),
                Some(&session.id),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(resumed.status, SessionStatus::Completed);
        assert_eq!(resumed.completed_count, 10);
        let resumed_calls = resumed_processor.calls.lock().unwrap().clone();
        assert_eq!(resumed_calls, inputs[5..].to_vec());
    }

    #[test]
    fn test_resume_replays_stored_config() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let mut processor = ScriptedProcessor::new();
        processor.cancel_after = Some((1, cancel.clone()));

        let mut original_config = Params::new();
        original_config.insert("rate".to_string(), serde_json::json!(44_100));

        let session = manager(&ledger)
            .run_batch(
                &processor,
                &paths(&["/in/a", "/in/b"]),
                out.path(),
                &original_config,
                None,
                &cancel,
            )
            .unwrap();
        assert_eq!(session.status, SessionStatus::Paused);

        // A different config passed at resume time must be ignored.
        let mut different_config = Params::new();
        different_config.insert("rate".to_string(), serde_json::json!(8_000));

        let resumed_processor = ScriptedProcessor::new();
        manager(&ledger)
            .run_batch(
                &resumed_processor,
                &[],
                out.path(),
                &different_config,
                Some(&session.id),
                &CancelToken::new(),
            )
            .unwrap();

        let seen = resumed_processor.seen_params.lock().unwrap();
        assert!(seen.iter().all(|p| p == &original_config));
    }

    #[test]
    fn test_resume_unknown_session() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let processor = ScriptedProcessor::new();

        let err = manager(&ledger)
            .run_batch(
                &processor,
                &[],
                out.path(),
                &Params::new(),
                Some("ghost"),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[test]
    fn test_resume_completed_session_rejected() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let processor = ScriptedProcessor::new();
        let mgr = manager(&ledger);

        let session = mgr
            .run_batch(
                &processor,
                &paths(&["/in/a"]),
                out.path(),
                &Params::new(),
                None,
                &CancelToken::new(),
            )
            .unwrap();

        let err = mgr
            .run_batch(
                &processor,
                &[],
                out.path(),
                &Params::new(),
                Some(&session.id),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyCompleted { .. }));
    }

    #[test]
    fn test_resume_with_wrong_processor_rejected() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let mut processor = ScriptedProcessor::new();
        processor.cancel_after = Some((1, cancel.clone()));

        let session = manager(&ledger)
            .run_batch(
                &processor,
                &paths(&["/in/a", "/in/b"]),
                out.path(),
                &Params::new(),
                None,
                &cancel,
            )
            .unwrap();

        struct OtherProcessor;
        impl Processor for OtherProcessor {
            fn name(&self) -> &str {
                "other"
            }
            fn process(&self, _: &Path, _: &Path, _: &Params) -> ProcessOutcome {
                ProcessOutcome::success(Vec::new())
            }
        }

        let err = manager(&ledger)
            .run_batch(
                &OtherProcessor,
                &[],
                out.path(),
                &Params::new(),
                Some(&session.id),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::ProcessorMismatch { .. }));
    }

    #[test]
    fn test_locked_session_rejected() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let mut processor = ScriptedProcessor::new();
        processor.cancel_after = Some((1, cancel.clone()));

        let session = manager(&ledger)
            .run_batch(
                &processor,
                &paths(&["/in/a", "/in/b"]),
                out.path(),
                &Params::new(),
                None,
                &cancel,
            )
            .unwrap();

        // Hold the run lock as a concurrent runner would.
        ledger.acquire_lock(&session.id).unwrap();

        let err = manager(&ledger)
            .run_batch(
                &ScriptedProcessor::new(),
                &[],
                out.path(),
                &Params::new(),
                Some(&session.id),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::Locked(_)));

        // Released lock makes the session resumable again.
        ledger.release_lock(&session.id).unwrap();
        let resumed = manager(&ledger)
            .run_batch(
                &ScriptedProcessor::new(),
                &[],
                out.path(),
                &Params::new(),
                Some(&session.id),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(resumed.status, SessionStatus::Completed);
    }

    #[test]
    fn test_resume_latest_and_resumable_lookup() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let mgr = manager(&ledger);

        assert!(mgr.get_resumable_session().unwrap().is_none());
        assert!(mgr
            .resume_latest(&ScriptedProcessor::new(), out.path(), &CancelToken::new())
            .unwrap()
            .is_none());

        let cancel = CancelToken::new();
        let mut processor = ScriptedProcessor::new();
        processor.cancel_after = Some((1, cancel.clone()));
        let paused = mgr
            .run_batch(
                &processor,
                &paths(&["/in/a", "/in/b"]),
                out.path(),
                &Params::new(),
                None,
                &cancel,
            )
            .unwrap();

        let resumable = mgr.get_resumable_session().unwrap().unwrap();
        assert_eq!(resumable.id, paused.id);

        let resumed = mgr
            .resume_latest(&ScriptedProcessor::new(), out.path(), &CancelToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(resumed.id, paused.id);
        assert_eq!(resumed.status, SessionStatus::Completed);
    }

    #[test]
    fn test_clean_old_sessions_delegates_to_ledger() {
        let ledger = test_ledger();
        let out = tempfile::tempdir().unwrap();
        let mgr = manager(&ledger);

        mgr.run_batch(
            &ScriptedProcessor::new(),
            &paths(&["/in/a"]),
            out.path(),
            &Params::new(),
            None,
            &CancelToken::new(),
        )
        .unwrap();

        // Future cutoff purges the completed session.
        assert_eq!(mgr.clean_old_sessions(Duration::seconds(-60)).unwrap(), 1);
        assert!(mgr.list_sessions(None, 10).unwrap().is_empty());
    }

    /// Ledger wrapper that counts checkpoint calls, delegating everything
    /// else to a real in-memory ledger.
    struct CountingLedger {
        inner: SqliteLedger,
        checkpoints: std::sync::atomic::AtomicU64,
    }

    impl CountingLedger {
        fn new() -> Self {
            Self {
                inner: SqliteLedger::open_in_memory().unwrap(),
                checkpoints: std::sync::atomic::AtomicU64::new(0),
            }
        }
    }

    impl Ledger for CountingLedger {
        fn create_session(
            &self,
            processor_id: &str,
            config: &Params,
            paths: &[PathBuf],
        ) -> Result<Session, LedgerError> {
            self.inner.create_session(processor_id, config, paths)
        }

        fn get_session(&self, session_id: &str) -> Result<Option<Session>, LedgerError> {
            self.inner.get_session(session_id)
        }

        fn get_latest_incomplete(&self) -> Result<Option<Session>, LedgerError> {
            self.inner.get_latest_incomplete()
        }

        fn list_sessions(
            &self,
            status: Option<SessionStatus>,
            limit: u32,
        ) -> Result<Vec<Session>, LedgerError> {
            self.inner.list_sessions(status, limit)
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
            self.inner.update_file_status(
                session_id,
                path,
                status,
                output_paths,
                metadata,
                error_message,
            )
        }

        fn checkpoint(&self, session_id: &str) -> Result<(), LedgerError> {
            self.checkpoints.fetch_add(1, Ordering::SeqCst);
            self.inner.checkpoint(session_id)
        }

        fn complete_session(
            &self,
            session_id: &str,
            final_status: SessionStatus,
        ) -> Result<(), LedgerError> {
            self.inner.complete_session(session_id, final_status)
        }

        fn pause_session(&self, session_id: &str) -> Result<(), LedgerError> {
            self.inner.pause_session(session_id)
        }

        fn reopen_session(&self, session_id: &str) -> Result<(), LedgerError> {
            self.inner.reopen_session(session_id)
        }

        fn get_pending_files(
            &self,
            session_id: &str,
        ) -> Result<Vec<crate::session::types::FileRecord>, LedgerError> {
            self.inner.get_pending_files(session_id)
        }

        fn acquire_lock(&self, session_id: &str) -> Result<(), LedgerError> {
            self.inner.acquire_lock(session_id)
        }

        fn release_lock(&self, session_id: &str) -> Result<(), LedgerError> {
            self.inner.release_lock(session_id)
        }

        fn delete_session(&self, session_id: &str) -> Result<bool, LedgerError> {
            self.inner.delete_session(session_id)
        }

        fn delete_older_than(&self, age: Duration) -> Result<usize, LedgerError> {
            self.inner.delete_older_than(age)
        }
    }

    #[test]
    fn test_checkpoint_interval_is_honored() {
        let ledger = Arc::new(CountingLedger::new());
        let out = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(ledger.clone()).with_checkpoint_interval(3);

        let inputs: Vec<PathBuf> = (0..10).map(|i| PathBuf::from(format!("/in/f{}", i))).collect();
        mgr.run_batch(
            &ScriptedProcessor::new(),
            &inputs,
            out.path(),
            &Params::new(),
            None,
            &CancelToken::new(),
        )
        .unwrap();

        // Every third item: after items 3, 6 and 9, nowhere else.
        assert_eq!(ledger.checkpoints.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
