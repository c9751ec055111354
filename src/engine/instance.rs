//! Instance lifecycle helpers.
//!
//! Each run moves the runner through [`InstanceState`]. The helpers here
//! call the module's entry exports with the calling convention of a
//! host that passes no arguments: every parameter is zero.

use crate::context::RunnerState;
use wasmtime::{Func, Instance, Store, Val, ValType};

/// Reactor initializer export
pub const INITIALIZE_EXPORT: &str = "_initialize";

/// Reactor main export
pub const MAIN_EXPORT: &str = "main";

/// Lifecycle state of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// No run started yet
    Idle,
    /// Module instantiated, import unit not yet bound
    Instantiated,
    /// Entry points executing
    Running,
    /// Last run returned without exiting
    Settled,
    /// Last run ended with the exit signal
    Exited(i32),
    /// Last run failed
    Crashed,
}

/// Call an entry export, zero-filling its parameters and discarding its
/// results.
pub(crate) fn call_entry(store: &mut Store<RunnerState>, func: Func) -> anyhow::Result<()> {
    let ty = func.ty(&*store);
    let params = ty
        .params()
        .map(|param| zero_value(&param))
        .collect::<anyhow::Result<Vec<Val>>>()?;
    let mut results = ty.results().map(|_| Val::I32(0)).collect::<Vec<Val>>();
    func.call(&mut *store, &params, &mut results)
}

fn zero_value(ty: &ValType) -> anyhow::Result<Val> {
    match ty {
        ValType::I32 => Ok(Val::I32(0)),
        ValType::I64 => Ok(Val::I64(0)),
        ValType::F32 => Ok(Val::F32(0)),
        ValType::F64 => Ok(Val::F64(0)),
        other => anyhow::bail!("unsupported entry point parameter type {}", other),
    }
}

/// Run the reactor entry points.
///
/// Command modules start from `_start` inside the system interface; a
/// module exporting `_initialize` is a reactor and gets `_initialize`
/// followed by `main`.
pub(crate) fn run_reactor(store: &mut Store<RunnerState>, instance: &Instance) -> anyhow::Result<bool> {
    let Some(initialize) = instance.get_func(&mut *store, INITIALIZE_EXPORT) else {
        return Ok(false);
    };
    call_entry(store, initialize)?;

    let main = instance
        .get_func(&mut *store, MAIN_EXPORT)
        .ok_or_else(|| anyhow::anyhow!("reactor module exports `_initialize` but no `main`"))?;
    call_entry(store, main)?;
    Ok(true)
}
