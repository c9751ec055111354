//! # WASI Runner
//!
//! Loads a WebAssembly module built against WASI preview 1 and runs it
//! with an isolated in-memory filesystem, captured stdout/stderr and an
//! optional companion runtime (an "import unit").
//!
//! ## Architecture
//!
//! ```text
//! entry mode (dev / test / local)
//!     │
//!     │ resolve import unit, build runner
//!     ▼
//! Runner (this crate)
//!     │
//!     │ compose imports: unit → wasi_snapshot_preview1 → extras
//!     ▼
//! wasmtime + wasmtime-wasi (preview 1)
//! ```
//!
//! ## Features
//!
//! - **Stdio capture**: writes to fd 1 and 2 reach callbacks as text
//! - **Import units**: plain units or runtime bridges bound on demand
//! - **Dev reload**: watcher socket driven re-fetch and re-run
//! - **Test reporting**: exit codes and output reported to a test driver
//! - **Compilation caching**: unchanged bytes skip compilation

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod context;
pub mod engine;
pub mod entry;
pub mod error;
pub mod host_functions;
pub mod logging;
pub mod metrics;
pub mod unit;

// Re-export commonly used types
pub use config::{EntryConfig, RunnerConfig};
pub use context::{Context, RunnerOptions, RunnerState};
pub use engine::imports::{HostFunc, ImportNamespace, ImportObject};
pub use engine::instance::InstanceState;
pub use engine::{InterruptHandle, Runner, RunnerEngine};
pub use error::{ErrorCode, ErrorReport, RunnerError};
pub use metrics::RunMetrics;
pub use unit::bridge::RuntimeBridge;
pub use unit::loader::{ImportUnitLoader, ModuleResolver, StaticResolver, UnitModule};
pub use unit::{ImportUnit, ImportUnitClass};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
