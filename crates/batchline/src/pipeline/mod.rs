//! Multi-step pipeline configuration and execution.

pub mod config;
pub mod engine;
pub mod error;

pub use config::{InputSpec, PipelineConfig, PipelineSettings, StepConfig};
pub use engine::{PipelineEngine, PipelineRun, PipelineStatus, StepOutcome};
pub use error::PipelineError;
