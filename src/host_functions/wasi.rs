//! System-interface adapter.
//!
//! Wraps the wasmtime-wasi preview 1 implementation: builds its context
//! over the runner's stdio streams and clocks, exports its import table as
//! an [`ImportNamespace`] with the runner's `clock_res_get` in place, and
//! starts it against a live instance.
//!
//! `clock_res_get` is answered by the runner instead of being forwarded to
//! the wasmtime-wasi function: a host function called from another host
//! function does not see the calling instance's exports, so the forwarded
//! call could not reach `memory`.

use super::clock::{self, Clocks};
use super::stdio::VirtualFs;
use super::MEMORY_EXPORT;
use crate::context::{MemoryView, RunnerOptions, RunnerState};
use crate::engine::imports::ImportNamespace;
use crate::engine::instance::call_entry;
use tracing::debug;
use wasmtime::{Extern, Instance, Linker, Store};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::WasiCtxBuilder;

/// Namespace of the system-interface imports
pub const WASI_NAMESPACE: &str = "wasi_snapshot_preview1";

/// Command entry point called when the system interface starts
pub const START_EXPORT: &str = "_start";

/// Import answered by the memory-refreshing clock
pub const CLOCK_RES_GET: &str = "clock_res_get";

/// Build the WASI context bound to `{ args, env }`. Stdout and stderr are
/// the streams of `fs`; the clocks are shared with `clocks`.
pub fn build_context(options: &RunnerOptions, fs: &VirtualFs, clocks: &Clocks) -> WasiP1Ctx {
    let mut builder = WasiCtxBuilder::new();
    builder
        .args(options.args.as_slice())
        .envs(options.env.as_slice())
        .stdout(fs.stdout())
        .stderr(fs.stderr())
        .wall_clock(clocks.wall())
        .monotonic_clock(clocks.monotonic());
    builder.build_p1()
}

/// The adapter's import table, with `clock_res_get` patched.
///
/// Functions are instantiated in `store`, so the table is only valid for
/// modules instantiated in the same store.
pub fn import_table(store: &mut Store<RunnerState>) -> anyhow::Result<ImportNamespace> {
    let mut linker: Linker<RunnerState> = Linker::new(store.engine());
    wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state: &mut RunnerState| &mut state.wasi)?;

    let definitions: Vec<(String, Extern)> = linker
        .iter(&mut *store)
        .filter(|(module, _, _)| *module == WASI_NAMESPACE)
        .map(|(_, name, item)| (name.to_string(), item))
        .collect();

    let mut namespace = ImportNamespace::new();
    for (name, item) in definitions {
        namespace.insert_extern(name, item);
    }
    namespace.insert_extern(CLOCK_RES_GET, Extern::Func(clock::clock_res_get(&mut *store)));

    debug!(functions = namespace.len(), "Built system-interface import table");
    Ok(namespace)
}

/// Start the system interface against `instance`.
///
/// Binds the adapter memory view to the `memory` export and runs `_start`
/// when the module is a command.
pub fn start(store: &mut Store<RunnerState>, instance: &Instance) -> anyhow::Result<()> {
    if let Some(memory) = instance.get_memory(&mut *store, MEMORY_EXPORT) {
        let view = MemoryView::new(&*store, memory);
        store.data_mut().memory = Some(view);
    }

    if let Some(entry) = instance.get_func(&mut *store, START_EXPORT) {
        debug!("Calling _start");
        call_entry(store, entry)?;
    }

    Ok(())
}
