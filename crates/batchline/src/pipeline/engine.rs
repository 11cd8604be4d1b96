//! Pipeline execution: validate, dry-run, execute with step chaining.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, info_span};

use crate::ledger::Ledger;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::error::PipelineError;
use crate::processor::ProcessorRegistry;
use crate::progress::{NoopProgress, ProgressReporter};
use crate::scan::scan_files;
use crate::session::manager::{CancelToken, SessionManager};
use crate::session::types::{FileStatus, Session, SessionStatus};

/// Why a pipeline run ended. Halt variants carry the zero-based index of
/// the step that stopped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Completed,
    HaltedFailed(usize),
    HaltedPaused(usize),
}

/// The session produced by one executed step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub processor: String,
    pub session: Session,
}

/// Result of `PipelineEngine::execute`. Contains an outcome for every step
/// that ran; steps after a halt are absent.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub steps: Vec<StepOutcome>,
    pub status: PipelineStatus,
}

/// Runs pipeline configs against a processor registry, one durable session
/// per step. Outputs of each completed step feed the next.
pub struct PipelineEngine {
    ledger: Arc<dyn Ledger>,
    registry: Arc<ProcessorRegistry>,
    progress: Arc<dyn ProgressReporter>,
}

impl PipelineEngine {
    pub fn new(ledger: Arc<dyn Ledger>, registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            ledger,
            registry,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    fn manager_for(&self, config: &PipelineConfig) -> SessionManager {
        SessionManager::new(self.ledger.clone())
            .with_checkpoint_interval(config.settings.checkpoint_interval)
            .with_progress(self.progress.clone())
    }

    /// Collects every problem with the config: missing input path, unknown
    /// processors, invalid step params. Empty means runnable.
    pub fn validate(&self, config: &PipelineConfig) -> Vec<String> {
        let mut errors = Vec::new();

        if !config.input.path.is_dir() {
            errors.push(format!(
                "input path does not exist: {}",
                config.input.path.display()
            ));
        }

        for step in &config.steps {
            match self.registry.get(&step.processor) {
                None => errors.push(format!(
                    "step '{}': unknown processor '{}'",
                    step.name, step.processor
                )),
                Some(processor) => {
                    for problem in processor.validate_params(&step.params) {
                        errors.push(format!("step '{}': {}", step.name, problem));
                    }
                }
            }
        }

        errors
    }

    /// Validates, then returns the execution plan without touching disk or
    /// ledger: one line per step, `Step {i}: {name} ({processor})`.
    pub fn dry_run(&self, config: &PipelineConfig) -> Result<Vec<String>, PipelineError> {
        let errors = self.validate(config);
        if !errors.is_empty() {
            return Err(PipelineError::Invalid { errors });
        }

        info!(
            pipeline = %config.name,
            input = %config.input.path.display(),
            output = %config.settings.output_dir.display(),
            steps = config.steps.len(),
            "Dry run"
        );

        Ok(config
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("Step {}: {} ({})", i + 1, step.name, step.processor))
            .collect())
    }

    /// Runs the pipeline. Halts without touching later steps when a step
    /// session ends `Failed` or `Paused`, or (with `continue_on_error`
    /// off) when any item in a step failed. Outputs already written by
    /// earlier steps are left in place.
    ///
    /// With `resume` set, the first step picks up the latest incomplete
    /// session if one exists for its processor; later steps always start
    /// fresh.
    ///
    /// An empty input set still leaves an audit trail: one completed
    /// zero-file session for the first step, and the run returns
    /// `Completed` without visiting the remaining steps.
    pub fn execute(
        &self,
        config: &PipelineConfig,
        resume: bool,
        cancel: &CancelToken,
    ) -> Result<PipelineRun, PipelineError> {
        let errors = self.validate(config);
        if !errors.is_empty() {
            return Err(PipelineError::Invalid { errors });
        }

        let manager = self.manager_for(config);
        let mut inputs = scan_files(
            &config.input.path,
            config.input.recursive,
            &config.input.formats,
        )?;

        let span = info_span!("pipeline", name = %config.name);
        let _guard = span.enter();
        info!(files = inputs.len(), "Pipeline starting");

        // With nothing to process, record a single empty session for the
        // first step instead of one per step.
        if inputs.is_empty() {
            if let Some(step) = config.steps.first() {
                let processor = self
                    .registry
                    .get(&step.processor)
                    .ok_or_else(|| PipelineError::UnknownProcessor(step.processor.clone()))?;
                let step_dir = config
                    .settings
                    .output_dir
                    .join(format!("step_01_{}", step.name));
                let session = manager.run_batch(
                    processor.as_ref(),
                    &[],
                    &step_dir,
                    &step.params,
                    None,
                    cancel,
                )?;
                info!("Pipeline finished with no input files");
                return Ok(PipelineRun {
                    steps: vec![StepOutcome {
                        name: step.name.clone(),
                        processor: step.processor.clone(),
                        session,
                    }],
                    status: PipelineStatus::Completed,
                });
            }
        }

        let mut steps = Vec::with_capacity(config.steps.len());
        let mut status = PipelineStatus::Completed;

        for (i, step) in config.steps.iter().enumerate() {
            let processor = self
                .registry
                .get(&step.processor)
                .ok_or_else(|| PipelineError::UnknownProcessor(step.processor.clone()))?;

            let step_dir = config
                .settings
                .output_dir
                .join(format!("step_{:02}_{}", i + 1, step.name));

            let resume_id = if resume && i == 0 {
                self.ledger
                    .get_latest_incomplete()
                    .map_err(crate::session::SessionError::from)?
                    .filter(|s| s.processor_id == step.processor)
                    .map(|s| s.id)
            } else {
                None
            };

            let step_span = info_span!("step", name = %step.name, processor = %step.processor);
            let _step_guard = step_span.enter();

            let session = manager.run_batch(
                processor.as_ref(),
                &inputs,
                &step_dir,
                &step.params,
                resume_id.as_deref(),
                cancel,
            )?;

            let session_status = session.status;
            let failed_items = session.failed_count;

            // Outputs of completed records feed the next step.
            inputs = session
                .files
                .iter()
                .filter(|f| f.status == FileStatus::Completed)
                .flat_map(|f| f.output_paths.iter().cloned())
                .collect::<Vec<PathBuf>>();

            steps.push(StepOutcome {
                name: step.name.clone(),
                processor: step.processor.clone(),
                session,
            });

            match session_status {
                SessionStatus::Failed => {
                    status = PipelineStatus::HaltedFailed(i);
                    break;
                }
                SessionStatus::Paused => {
                    status = PipelineStatus::HaltedPaused(i);
                    break;
                }
                _ => {}
            }

            if failed_items > 0 && !config.settings.continue_on_error {
                info!(step = %step.name, failed = failed_items, "Halting on item failures");
                status = PipelineStatus::HaltedFailed(i);
                break;
            }
        }

        info!(?status, steps = steps.len(), "Pipeline finished");
        Ok(PipelineRun { steps, status })
    }
}
