use thiserror::Error;

use crate::error::ConfigError;
use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline validation failed: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },

    #[error("unknown processor '{0}'")]
    UnknownProcessor(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
