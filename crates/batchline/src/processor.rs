//! Processor contract and registry.
//!
//! A processor transforms one input file into zero or more outputs. It
//! reports per-item failure through `ProcessOutcome` rather than an error
//! type, so the batch loop treats a bad file as data, not as a reason to
//! stop. Processors must not mutate their inputs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::session::types::{Params, ProcessOutcome};

/// Declares one accepted parameter, for validation and tooling.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
    /// Inclusive bounds, checked only for numeric values.
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ParamSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
            default: None,
            min: None,
            max: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

pub trait Processor: Send + Sync {
    /// Stable identifier, used in session records and pipeline configs.
    fn name(&self) -> &str;

    /// Parameters this processor accepts. Empty means "takes anything".
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// Returns one message per problem; empty means valid. The default
    /// checks required presence and numeric bounds against `parameters()`.
    fn validate_params(&self, params: &Params) -> Vec<String> {
        let mut errors = Vec::new();
        for spec in self.parameters() {
            match params.get(&spec.name) {
                None => {
                    if spec.required && spec.default.is_none() {
                        errors.push(format!("missing required parameter '{}'", spec.name));
                    }
                }
                Some(value) => {
                    if let Some(n) = value.as_f64() {
                        if let Some(min) = spec.min {
                            if n < min {
                                errors.push(format!(
                                    "parameter '{}' is {} but must be >= {}",
                                    spec.name, n, min
                                ));
                            }
                        }
                        if let Some(max) = spec.max {
                            if n > max {
                                errors.push(format!(
                                    "parameter '{}' is {} but must be <= {}",
                                    spec.name, n, max
                                ));
                            }
                        }
                    }
                }
            }
        }
        errors
    }

    /// Processes one input file, writing any outputs under `output_dir`.
    /// Failure is reported in the outcome; implementations should not panic.
    ///
    /// An interrupted item is re-run after resume, so outputs should be
    /// written atomically (temp file then rename) to avoid partial files
    /// being taken for finished ones.
    fn process(&self, input: &Path, output_dir: &Path, params: &Params) -> ProcessOutcome;
}

/// Explicit processor lookup. No global state; callers build and pass one.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers under the processor's own name. Re-registering a name
    /// replaces the previous entry.
    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        self.processors
            .insert(processor.name().to_string(), processor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.processors.keys().cloned().collect()
    }
}
