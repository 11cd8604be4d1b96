//! Shared harness for integration tests: isolated temp directories, a
//! file-backed ledger, and a real file-writing processor.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

use tempfile::TempDir;

use batchline::{
    CancelToken, Params, ProcessOutcome, Processor, ProcessorRegistry, SqliteLedger,
};

static TRACING: Once = Once::new();

/// Installs a tracing subscriber once per test binary so span and event
/// output shows up under `RUST_LOG=...` with captured test output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub db_path: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        init_tracing();

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let input_dir = base.join("input");
        let output_dir = base.join("output");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        Self {
            db_path: base.join("ledger.db"),
            temp_dir,
            input_dir,
            output_dir,
        }
    }

    /// Opens a fresh ledger handle on the harness database, as a restarted
    /// process would.
    pub fn open_ledger(&self) -> Arc<SqliteLedger> {
        Arc::new(SqliteLedger::open(&self.db_path).expect("Failed to open ledger"))
    }

    pub fn write_input(&self, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.input_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    /// Writes `count` numbered input files and returns their paths, sorted.
    pub fn seed_inputs(&self, count: usize) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = (0..count)
            .map(|i| self.write_input(&format!("track_{:02}.wav", i), b"fake audio"))
            .collect();
        paths.sort();
        paths
    }
}

/// Copies each input into the output directory under a new extension,
/// counting invocations. Optionally cancels a token after N calls.
pub struct SuffixProcessor {
    name: String,
    suffix: String,
    pub calls: AtomicU64,
    pub cancel_after: Option<(u64, CancelToken)>,
}

impl SuffixProcessor {
    pub fn new(name: &str, suffix: &str) -> Self {
        Self {
            name: name.to_string(),
            suffix: suffix.to_string(),
            calls: AtomicU64::new(0),
            cancel_after: None,
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Processor for SuffixProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, input: &Path, output_dir: &Path, _params: &Params) -> ProcessOutcome {
        let done = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if done >= *after {
                token.cancel();
            }
        }

        let file_name = format!(
            "{}.{}",
            input.file_stem().unwrap_or_default().to_string_lossy(),
            self.suffix
        );
        let out = output_dir.join(file_name);
        match std::fs::copy(input, &out) {
            Ok(_) => ProcessOutcome::success(vec![out]),
            Err(e) => ProcessOutcome::failure(format!("copy failed: {}", e)),
        }
    }
}

pub fn registry_of(processors: Vec<Arc<dyn Processor>>) -> Arc<ProcessorRegistry> {
    let mut registry = ProcessorRegistry::new();
    for p in processors {
        registry.register(p);
    }
    Arc::new(registry)
}
