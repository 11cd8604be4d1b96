//! Pipeline configuration: YAML schema, parsing and structural validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::session::types::Params;

fn default_version() -> String {
    "1.0".to_string()
}

fn default_checkpoint_interval() -> u64 {
    100
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    /// Keep going past item-level failures. Whole-step halts are not
    /// affected; a step session that ends failed or paused always stops
    /// the pipeline.
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval: default_checkpoint_interval(),
            continue_on_error: false,
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Accepted file extensions, without the dot. Empty accepts all files.
    #[serde(default)]
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub processor: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub settings: PipelineSettings,
    pub input: InputSpec,
    pub steps: Vec<StepConfig>,
}

impl PipelineConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        config.validate_shape()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Structural checks that do not need a processor registry. Semantic
    /// validation (processor existence, params) is the engine's job.
    fn validate_shape(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "pipeline name must not be empty".to_string(),
            });
        }
        if self.steps.is_empty() {
            return Err(ConfigError::Validation {
                message: "pipeline must define at least one step".to_string(),
            });
        }
        if self.settings.checkpoint_interval < 1 {
            return Err(ConfigError::Validation {
                message: "settings.checkpoint_interval must be >= 1".to_string(),
            });
        }

        let mut names = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ConfigError::Validation {
                    message: format!("step {} has an empty name", i + 1),
                });
            }
            if step.processor.trim().is_empty() {
                return Err(ConfigError::Validation {
                    message: format!("step '{}' has an empty processor", step.name),
                });
            }
            if !names.insert(step.name.as_str()) {
                return Err(ConfigError::Validation {
                    message: format!("duplicate step name '{}'", step.name),
                });
            }
        }

        Ok(())
    }
}
