//! Development mode.
//!
//! Fetches the module from the dev server and runs it. Writes to stderr
//! forward a host stack trace over the watcher socket. A `reload` command
//! stops the running module, if any, and starts a fresh session on a
//! fresh runner. The mode ends when the server closes the socket.
//!
//! A session is only left once its module thread has joined: the engine
//! is interrupted again and again until the thread returns, so no module
//! keeps running after its session ended.

use super::socket::{ReportSink, WatcherSocket};
use super::{fetch_wasm, handle_error, joined, spawn_run, stack_trace_reporter};
use crate::config::EntryConfig;
use crate::context::RunnerOptions;
use crate::engine::{Runner, RunnerEngine};
use crate::error::Result;
use crate::unit::loader::{ImportUnitLoader, ModuleResolver};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Pause between two interrupts of a module being stopped
pub const INTERRUPT_RETRY: Duration = Duration::from_millis(10);

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Reload,
    Close,
}

/// Run dev mode until the watcher socket closes. Returns the number of
/// sessions started.
#[instrument(skip(config, resolver), fields(server = %config.server_url))]
pub async fn run(config: EntryConfig, resolver: Arc<dyn ModuleResolver>) -> Result<usize> {
    config.validate()?;

    let runner_config = config.runner.clone().with_epoch_interruption(true);
    let engine = RunnerEngine::new(&runner_config)?;
    let config = config.with_runner(runner_config);

    let socket = WatcherSocket::connect(&config.watcher_url()).await?;
    let mut sessions = 0;

    loop {
        sessions += 1;
        if session(&config, &engine, Arc::clone(&resolver), &socket).await == Next::Close {
            break;
        }
        info!("Reloading module");
    }

    socket.close().await;
    Ok(sessions)
}

async fn session(
    config: &EntryConfig,
    engine: &RunnerEngine,
    resolver: Arc<dyn ModuleResolver>,
    socket: &WatcherSocket,
) -> Next {
    let prepared = tokio::select! {
        prepared = prepare(config, engine, resolver, socket.sink()) => prepared,
        _ = socket.reload_requested() => return Next::Reload,
        _ = socket.closed() => return Next::Close,
    };

    let mut running = match prepared {
        Ok((runner, wasm_bytes)) => spawn_run(runner, wasm_bytes),
        Err(e) => {
            handle_error(&e);
            return idle(socket).await;
        }
    };

    tokio::select! {
        finished = &mut running => {
            match joined(finished) {
                Ok((_, Err(e))) | Err(e) => handle_error(&e),
                Ok((_, Ok(()))) => {}
            }
            idle(socket).await
        }
        _ = socket.reload_requested() => {
            stop(engine, running).await;
            Next::Reload
        }
        _ = socket.closed() => {
            stop(engine, running).await;
            Next::Close
        }
    }
}

/// Fetch the module and build its runner
async fn prepare(
    config: &EntryConfig,
    engine: &RunnerEngine,
    resolver: Arc<dyn ModuleResolver>,
    sink: Arc<dyn ReportSink>,
) -> Result<(Runner, Vec<u8>)> {
    let wasm_bytes = fetch_wasm(config).await?;
    let unit_class = ImportUnitLoader::from_specifiers(resolver, &config.unit_specifiers).resolve();

    let options = RunnerOptions::new()
        .with_config(config.runner.clone())
        .on_stderr(stack_trace_reporter(sink));
    let runner = Runner::with_engine(engine.clone(), options, unit_class)?;
    Ok((runner, wasm_bytes))
}

async fn idle(socket: &WatcherSocket) -> Next {
    tokio::select! {
        _ = socket.reload_requested() => Next::Reload,
        _ = socket.closed() => Next::Close,
    }
}

/// Interrupt until the module thread returns.
///
/// A single interrupt can land before the run armed its epoch deadline,
/// for instance while the module is still compiling.
async fn stop(engine: &RunnerEngine, mut running: JoinHandle<(Runner, Result<()>)>) {
    let interrupt = engine.interrupt_handle();
    let mut attempts = 0u32;

    loop {
        interrupt.interrupt();
        attempts += 1;
        tokio::select! {
            finished = &mut running => {
                if let Ok((_, Err(e))) = joined(finished) {
                    debug!(error = %e, "Stopped module");
                }
                break;
            }
            _ = tokio::time::sleep(INTERRUPT_RETRY) => {}
        }
    }

    debug!(attempts, "Module thread joined");
}
