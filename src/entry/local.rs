//! Local test mode.
//!
//! Runs a module read from disk: `<wasm-file> [test-args...]`. The test
//! arguments are passed to the module as-is and the module resolver is
//! injected into the import unit's context. The exit signal's code
//! becomes the process exit code; any other failure propagates.

use super::run_blocking;
use crate::config::EntryConfig;
use crate::context::RunnerOptions;
use crate::engine::Runner;
use crate::error::{Result, RunnerError};
use crate::unit::loader::{ImportUnitLoader, ModuleResolver};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Error message for a missing module path
pub const MISSING_WASM_FILE: &str = "No WASM test file specified, can not run tests";

/// Positional arguments of the local mode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalArgs {
    /// Path of the module
    pub wasm_file: Option<PathBuf>,
    /// Arguments passed to the module
    pub test_args: Vec<String>,
}

impl LocalArgs {
    /// Split positionals: the first is the module path, the rest are
    /// module arguments
    pub fn from_positionals(positionals: impl IntoIterator<Item = String>) -> Self {
        let mut positionals = positionals.into_iter();
        Self {
            wasm_file: positionals.next().map(PathBuf::from),
            test_args: positionals.collect(),
        }
    }
}

/// Run a module from disk, returning the exit code to use for the process
#[instrument(skip(args, config, resolver), fields(wasm_file = ?args.wasm_file))]
pub async fn run(args: LocalArgs, config: &EntryConfig, resolver: Arc<dyn ModuleResolver>) -> Result<i32> {
    let wasm_file = args
        .wasm_file
        .ok_or_else(|| RunnerError::Usage(MISSING_WASM_FILE.into()))?;

    let wasm_bytes = tokio::fs::read(&wasm_file).await?;
    debug!(size = wasm_bytes.len(), "Read module");

    let unit_class = ImportUnitLoader::from_specifiers(Arc::clone(&resolver), &config.unit_specifiers).resolve();
    let options = RunnerOptions::new()
        .with_args(args.test_args)
        .with_config(config.runner.clone());
    let runner = Runner::new(options, unit_class)?.with_require(resolver);

    let (mut runner, outcome) = run_blocking(runner, wasm_bytes).await?;
    let outcome = outcome.and_then(|()| match runner.take_unhandled() {
        Some(reason) => Err(reason),
        None => Ok(()),
    });

    match outcome {
        Ok(()) => Ok(0),
        Err(RunnerError::Exit(code)) => Ok(code),
        Err(e) => Err(e),
    }
}
