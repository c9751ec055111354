//! Runner state and the context handed to import units.
//!
//! [`RunnerState`] is the data of the wasmtime store owned by a runner. It
//! carries the WASI preview 1 context, the virtual filesystem, the cached
//! memory view of the system-interface adapter and the queue of deferred
//! jobs drained by the runner's event loop.

use crate::config::RunnerConfig;
use crate::host_functions::clock::Clocks;
use crate::host_functions::stdio::{OutputCallback, VirtualFs};
use crate::unit::loader::ModuleResolver;
use std::collections::VecDeque;
use std::sync::Arc;
use wasmtime::{AsContext, AsContextMut, Instance, Memory, Store};
use wasmtime_wasi::preview1::WasiP1Ctx;

/// Work deferred past the end of [`Runner::run`](crate::Runner::run).
///
/// Jobs run in FIFO order on the runner's event loop. A job that fails is
/// an asynchronous outcome and is reported as an unhandled rejection.
pub type Job = Box<dyn FnOnce(&mut Store<RunnerState>) -> anyhow::Result<()> + Send>;

/// Options accepted by the runner factory
#[derive(Clone)]
pub struct RunnerOptions {
    /// Arguments passed to the module as-is
    pub args: Vec<String>,
    /// Environment of the module (empty by default)
    pub env: Vec<(String, String)>,
    /// Called for every text chunk the module writes to fd 1
    pub on_stdout: OutputCallback,
    /// Called for every text chunk the module writes to fd 2
    pub on_stderr: OutputCallback,
    /// Engine and filesystem settings
    pub config: RunnerConfig,
    /// Wall and monotonic clocks seen by the module
    pub clocks: Clocks,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            on_stdout: Arc::new(|_: &str| {}),
            on_stderr: Arc::new(|_: &str| {}),
            config: RunnerConfig::default(),
            clocks: Clocks::default(),
        }
    }
}

impl RunnerOptions {
    /// Create options with no-op callbacks and no arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the module arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set the module environment
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Set the stdout callback
    pub fn on_stdout(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stdout = Arc::new(callback);
        self
    }

    /// Set the stderr callback
    pub fn on_stderr(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stderr = Arc::new(callback);
        self
    }

    /// Set the runner configuration
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the module's clocks
    pub fn with_clocks(mut self, clocks: Clocks) -> Self {
        self.clocks = clocks;
        self
    }
}

impl std::fmt::Debug for RunnerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerOptions")
            .field("args", &self.args)
            .field("env", &self.env)
            .field("config", &self.config)
            .field("clocks", &self.clocks)
            .finish_non_exhaustive()
    }
}

/// Context handed once to the import unit after instantiation
#[derive(Clone)]
pub struct Context {
    /// The live module instance
    pub instance: Instance,
    /// Module resolver injected by the host, for units that look up
    /// companion modules at runtime
    pub require: Option<Arc<dyn ModuleResolver>>,
}

impl Context {
    /// Create a context for an instance
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            require: None,
        }
    }

    /// Inject a module resolver
    pub fn with_require(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.require = Some(resolver);
        self
    }
}

/// Out-of-bounds access through a [`MemoryView`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("memory access out of bounds: offset {offset}, length {len}, view size {view_len}")]
pub struct MemoryFault {
    /// Requested offset
    pub offset: usize,
    /// Requested length
    pub len: usize,
    /// Size of the view at the time of the access
    pub view_len: usize,
}

/// The system-interface adapter's cached view of instance memory.
///
/// The byte length is a snapshot taken at the last refresh. Accesses beyond
/// the snapshot fault even when the memory has since grown, so the view
/// must be refreshed after any call that may grow memory.
#[derive(Debug, Clone, Copy)]
pub struct MemoryView {
    memory: Memory,
    byte_len: usize,
}

impl MemoryView {
    /// Take a view of `memory` at its current size
    pub fn new(store: impl AsContext, memory: Memory) -> Self {
        let byte_len = memory.data_size(&store);
        Self { memory, byte_len }
    }

    /// Size of the view in bytes
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// The underlying memory
    pub fn memory(&self) -> Memory {
        self.memory
    }

    /// Re-read the memory size
    pub fn refresh(&mut self, store: impl AsContext) {
        self.byte_len = self.memory.data_size(&store);
    }

    /// Copy `len` bytes starting at `offset`
    pub fn read(&self, store: impl AsContext, offset: usize, len: usize) -> Result<Vec<u8>, MemoryFault> {
        let fault = MemoryFault {
            offset,
            len,
            view_len: self.byte_len,
        };
        let end = offset.checked_add(len).ok_or_else(|| fault.clone())?;
        if end > self.byte_len {
            return Err(fault);
        }

        let mut buf = vec![0u8; len];
        self.memory
            .read(&store, offset, &mut buf)
            .map_err(|_| fault)?;
        Ok(buf)
    }

    /// Copy `bytes` to `offset`
    pub fn write(&self, store: impl AsContextMut, offset: usize, bytes: &[u8]) -> Result<(), MemoryFault> {
        let fault = MemoryFault {
            offset,
            len: bytes.len(),
            view_len: self.byte_len,
        };
        let end = offset.checked_add(bytes.len()).ok_or_else(|| fault.clone())?;
        if end > self.byte_len {
            return Err(fault);
        }

        self.memory.write(store, offset, bytes).map_err(|_| fault)
    }

    /// Read a little-endian `u32`
    pub fn read_u32(&self, store: impl AsContext, offset: usize) -> Result<u32, MemoryFault> {
        let bytes = self.read(store, offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Data of the store owned by a runner
pub struct RunnerState {
    /// WASI preview 1 context
    pub(crate) wasi: WasiP1Ctx,
    /// Virtual filesystem with the stdio interception
    pub(crate) fs: VirtualFs,
    /// Clocks installed in the WASI context
    pub(crate) clocks: Clocks,
    /// Adapter memory view, bound when the system interface starts
    pub(crate) memory: Option<MemoryView>,
    /// Deferred jobs
    jobs: VecDeque<Job>,
}

impl RunnerState {
    /// Create the store data
    pub fn new(wasi: WasiP1Ctx, fs: VirtualFs, clocks: Clocks) -> Self {
        Self {
            wasi,
            fs,
            clocks,
            memory: None,
            jobs: VecDeque::new(),
        }
    }

    /// The virtual filesystem
    pub fn fs(&self) -> &VirtualFs {
        &self.fs
    }

    /// The adapter memory view, if bound
    pub fn memory_view(&self) -> Option<&MemoryView> {
        self.memory.as_ref()
    }

    /// Defer a job to the runner's event loop
    pub fn enqueue_job(
        &mut self,
        job: impl FnOnce(&mut Store<RunnerState>) -> anyhow::Result<()> + Send + 'static,
    ) {
        self.jobs.push_back(Box::new(job));
    }

    /// Number of jobs waiting
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn take_job(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Engine, MemoryType};

    #[test]
    fn test_options_defaults() {
        let options = RunnerOptions::new();
        assert!(options.args.is_empty());
        assert!(options.env.is_empty());
        (options.on_stdout)("ignored");
        (options.on_stderr)("ignored");
    }

    #[test]
    fn test_options_builder() {
        let options = RunnerOptions::new()
            .with_args(vec!["--filter".into(), "Suite".into()])
            .with_config(RunnerConfig::new().with_mirror_console(false));
        assert_eq!(options.args.len(), 2);
        assert!(!options.config.mirror_console);
    }

    #[test]
    fn test_stale_memory_view_faults() {
        let engine = Engine::default();
        let mut store = Store::new(&engine, ());
        let memory = Memory::new(&mut store, MemoryType::new(1, None)).unwrap();

        let mut view = MemoryView::new(&store, memory);
        assert_eq!(view.byte_len(), 65536);

        memory.grow(&mut store, 1).unwrap();
        assert!(view.read(&store, 70000, 4).is_err());

        view.refresh(&store);
        assert_eq!(view.byte_len(), 131072);
        assert_eq!(view.read(&store, 70000, 4).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_read_u32() {
        let engine = Engine::default();
        let mut store = Store::new(&engine, ());
        let memory = Memory::new(&mut store, MemoryType::new(1, None)).unwrap();
        memory.write(&mut store, 8, &42u32.to_le_bytes()).unwrap();

        let view = MemoryView::new(&store, memory);
        assert_eq!(view.read_u32(&store, 8).unwrap(), 42);
        assert!(view.read_u32(&store, 65534).is_err());
    }

    #[test]
    fn test_write_checks_snapshot() {
        let engine = Engine::default();
        let mut store = Store::new(&engine, ());
        let memory = Memory::new(&mut store, MemoryType::new(1, None)).unwrap();

        let view = MemoryView::new(&store, memory);
        memory.grow(&mut store, 1).unwrap();

        assert!(view.write(&mut store, 70000, &[1]).is_err());
        view.write(&mut store, 100, &[7, 8]).unwrap();
        assert_eq!(view.read(&store, 100, 2).unwrap(), vec![7, 8]);
    }
}
