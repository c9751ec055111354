//! Host functions imported by the module.
//!
//! The system-interface table comes from wasmtime-wasi (preview 1), with
//! stdout and stderr bound to capturing streams. The runner answers
//! `clock_res_get` itself, for the memory view refresh, and provides the
//! fixed stack sanitizer import.

pub mod clock;
pub mod sanitizer;
pub mod stdio;
pub mod wasi;

use crate::context::{MemoryView, RunnerState};
use wasmtime::{Caller, Extern};

/// Name of the memory export the adapter binds to
pub const MEMORY_EXPORT: &str = "memory";

/// Refresh the adapter memory view from the caller's `memory` export.
///
/// Returns the refreshed view, or the previously bound one when the caller
/// exports no memory.
pub(crate) fn refresh_memory_view(caller: &mut Caller<'_, RunnerState>) -> Option<MemoryView> {
    let memory = match caller.get_export(MEMORY_EXPORT) {
        Some(Extern::Memory(memory)) => memory,
        _ => return caller.data().memory,
    };

    let view = MemoryView::new(&*caller, memory);
    caller.data_mut().memory = Some(view);
    Some(view)
}
