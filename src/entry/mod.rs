//! Entry modes.
//!
//! Every mode follows the same sequence: obtain the module bytes, resolve
//! an import unit, build a [`Runner`] with mode-specific callbacks, run it
//! and handle how it settles.
//!
//! - [`dev`]: fetch from the dev server, reload on request, forward stack
//!   traces.
//! - [`test`]: fetch from the dev server, report the verdict over the
//!   watcher socket.
//! - [`local`]: read from disk, map the exit signal to the process exit
//!   status.

pub mod dev;
pub mod local;
pub mod socket;

#[cfg(test)]
mod test_server;

use crate::config::EntryConfig;
use crate::engine::Runner;
use crate::error::{Result, RunnerError};
use socket::{ReportSink, SocketMessage};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, instrument};

/// Fetch the module bytes from the dev server
#[instrument(skip(config), fields(url = %config.wasm_url()))]
pub async fn fetch_wasm(config: &EntryConfig) -> Result<Vec<u8>> {
    let response = reqwest::get(config.wasm_url()).await?.error_for_status()?;
    let bytes = response.bytes().await?;
    info!(size = bytes.len(), "Fetched module");
    Ok(bytes.to_vec())
}

/// Start a module on a blocking thread; deferred jobs are drained once
/// the entry points returned.
pub fn spawn_run(mut runner: Runner, wasm_bytes: Vec<u8>) -> JoinHandle<(Runner, Result<()>)> {
    tokio::task::spawn_blocking(move || {
        let outcome = runner.run(&wasm_bytes, None);
        if outcome.is_ok() {
            runner.run_event_loop();
        }
        (runner, outcome)
    })
}

/// Run a module on a blocking thread, then drain its deferred jobs.
///
/// Returns the runner with the outcome of `run`.
pub async fn run_blocking(runner: Runner, wasm_bytes: Vec<u8>) -> Result<(Runner, Result<()>)> {
    joined(spawn_run(runner, wasm_bytes).await)
}

fn joined<T>(result: std::result::Result<T, JoinError>) -> Result<T> {
    result.map_err(|e| RunnerError::InvalidState(format!("runner thread failed: {}", e)))
}

/// `on_stderr` callback forwarding a host stack trace to `sink`
pub fn stack_trace_reporter(sink: Arc<dyn ReportSink>) -> impl Fn(&str) + Send + Sync + 'static {
    move |_text: &str| sink.send(SocketMessage::stack_trace())
}

/// Log a failed run; traps additionally log their Wasm backtrace
pub fn handle_error(err: &RunnerError) {
    error!(error = %err, code = %err.code(), "Run failed");
    if let RunnerError::Trap {
        backtrace: Some(backtrace),
        ..
    } = err
    {
        info!("{}", backtrace);
    }
}
