//! Runner engine management.
//!
//! This module provides the [`Runner`]: it owns one store with its WASI
//! context and virtual filesystem, at most one import unit, and runs
//! modules through the compile → link → instantiate → start sequence.

pub mod compiler;
pub mod event_loop;
pub mod imports;
pub mod instance;

use crate::config::RunnerConfig;
use crate::context::{Context, RunnerOptions, RunnerState};
use crate::error::{Result, RunnerError};
use crate::host_functions::sanitizer::{self, SANITIZER_NAMESPACE};
use crate::host_functions::stdio::VirtualFs;
use crate::host_functions::wasi::{self, WASI_NAMESPACE};
use crate::metrics::{RunMetrics, RunTimer};
use crate::unit::loader::ModuleResolver;
use crate::unit::{ImportUnit, ImportUnitClass};
use compiler::ModuleCache;
use event_loop::{RejectionEvent, UnhandledRejections};
use imports::ImportObject;
use instance::InstanceState;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use wasmtime::{Engine, Instance, Linker, Store};

/// Engine and module cache, shareable between runners
#[derive(Clone)]
pub struct RunnerEngine {
    engine: Engine,
    cache: Arc<ModuleCache>,
    epoch_interruption: bool,
}

impl RunnerEngine {
    /// Create an engine for `config`
    pub fn new(config: &RunnerConfig) -> Result<Self> {
        config.validate()?;

        let mut wasm_config = wasmtime::Config::new();
        wasm_config.epoch_interruption(config.epoch_interruption);
        let engine = Engine::new(&wasm_config)
            .map_err(|e| RunnerError::InvalidState(format!("engine configuration rejected: {:#}", e)))?;

        info!(
            epoch_interruption = config.epoch_interruption,
            cache_entries = config.module_cache_entries,
            "Initializing runner engine"
        );

        let cache = Arc::new(ModuleCache::new(engine.clone(), config.module_cache_entries));
        Ok(Self {
            engine,
            cache,
            epoch_interruption: config.epoch_interruption,
        })
    }

    /// The wasmtime engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The module cache
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Whether running modules can be interrupted
    pub fn epoch_interruption(&self) -> bool {
        self.epoch_interruption
    }

    /// Handle interrupting modules running on this engine
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            engine: self.engine.clone(),
        }
    }
}

/// Interrupts every module currently running on an engine.
///
/// Only effective when the engine was created with epoch interruption;
/// the interrupted call fails with a trap.
#[derive(Clone)]
pub struct InterruptHandle {
    engine: Engine,
}

impl InterruptHandle {
    /// Interrupt running modules
    pub fn interrupt(&self) {
        debug!("Interrupting running modules");
        self.engine.increment_epoch();
    }
}

/// A runner: one store, one system interface, at most one import unit
pub struct Runner {
    id: Uuid,
    engine: RunnerEngine,
    store: Store<RunnerState>,
    unit: Option<Box<dyn ImportUnit>>,
    require: Option<Arc<dyn ModuleResolver>>,
    rejections: UnhandledRejections,
    unhandled: Option<RunnerError>,
    state: InstanceState,
    metrics: Option<RunMetrics>,
}

impl Runner {
    /// Create a runner with its own engine
    pub fn new(options: RunnerOptions, unit_class: Option<ImportUnitClass>) -> Result<Self> {
        let engine = RunnerEngine::new(&options.config)?;
        Self::with_engine(engine, options, unit_class)
    }

    /// Create a runner on a shared engine
    pub fn with_engine(
        engine: RunnerEngine,
        options: RunnerOptions,
        unit_class: Option<ImportUnitClass>,
    ) -> Result<Self> {
        options.config.validate()?;

        let fs = VirtualFs::new(
            &options.config,
            Arc::clone(&options.on_stdout),
            Arc::clone(&options.on_stderr),
        );
        let wasi = wasi::build_context(&options, &fs, &options.clocks);
        let store = Store::new(engine.engine(), RunnerState::new(wasi, fs, options.clocks.clone()));
        let unit = unit_class.map(|class| class.instantiate());

        let id = Uuid::new_v4();
        debug!(runner_id = %id, args = ?options.args, has_unit = unit.is_some(), "Created runner");

        Ok(Self {
            id,
            engine,
            store,
            unit,
            require: None,
            rejections: UnhandledRejections::new(),
            unhandled: None,
            state: InstanceState::Idle,
            metrics: None,
        })
    }

    /// Inject the module resolver handed to the import unit
    pub fn with_require(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.require = Some(resolver);
        self
    }

    /// Register an unhandled rejection listener
    pub fn on_unhandled_rejection(&mut self, listener: impl FnMut(&mut RejectionEvent) + Send + 'static) {
        self.rejections.add_listener(listener);
    }

    /// Run a module.
    ///
    /// The import object is assembled from the unit's table, the system
    /// interface and `extra_imports`, in that order, with
    /// `__stack_sanitizer` fixed on top. Returns once the entry points
    /// returned; deferred jobs run in [`Runner::run_event_loop`].
    #[instrument(skip(self, wasm_bytes, extra_imports), fields(runner_id = %self.id, size = wasm_bytes.len()))]
    pub fn run(&mut self, wasm_bytes: &[u8], extra_imports: Option<ImportObject>) -> Result<()> {
        let mut timer = RunTimer::start();

        let mut extras = extra_imports.unwrap_or_default();
        extras.insert(SANITIZER_NAMESPACE, sanitizer::namespace());

        let mut imports = match &self.unit {
            Some(unit) => unit.import_object(),
            None => ImportObject::new(),
        };
        let wasi_table = wasi::import_table(&mut self.store)
            .map_err(|e| RunnerError::Instantiation(format!("{:#}", e)))?;
        imports.insert(WASI_NAMESPACE, wasi_table);
        imports.merge(extras);

        let compiled = self.engine.cache().compile(wasm_bytes)?;
        timer.mark_compiled(compiled.cache_hit);
        debug!(cache_hit = compiled.cache_hit, key = %compiled.key, "Module compiled");

        if self.engine.epoch_interruption() {
            self.store.set_epoch_deadline(1);
            self.store.epoch_deadline_trap();
        }

        let instance = self.instantiate(imports, &compiled.module)?;
        timer.mark_instantiated();
        self.state = InstanceState::Instantiated;

        let outcome = self.execute(&instance);

        self.state = match &outcome {
            Ok(()) => InstanceState::Settled,
            Err(RunnerError::Exit(code)) => InstanceState::Exited(*code),
            Err(_) => InstanceState::Crashed,
        };
        let metrics = timer.finish(outcome.as_ref().err().and_then(RunnerError::exit_code));
        debug!(
            compile_us = metrics.compile_time_us,
            instantiate_us = metrics.instantiate_time_us,
            execute_us = metrics.execute_time_us,
            state = ?self.state,
            "Run finished"
        );
        self.metrics = Some(metrics);

        outcome
    }

    fn instantiate(&mut self, imports: ImportObject, module: &wasmtime::Module) -> Result<Instance> {
        let mut linker: Linker<RunnerState> = Linker::new(self.engine.engine());
        imports
            .link(&mut linker, &mut self.store)
            .and_then(|()| linker.instantiate(&mut self.store, module))
            .map_err(|e| RunnerError::Instantiation(format!("{:#}", e)))
    }

    fn execute(&mut self, instance: &Instance) -> Result<()> {
        if let Some(unit) = self.unit.as_mut() {
            let mut context = Context::new(*instance);
            if let Some(resolver) = &self.require {
                context = context.with_require(Arc::clone(resolver));
            }
            unit.set_context(&mut self.store, &context).map_err(unit_error)?;
        }

        self.state = InstanceState::Running;
        wasi::start(&mut self.store, instance).map_err(RunnerError::from_execution)?;

        if let Some(unit) = self.unit.as_mut() {
            unit.start(&mut self.store).map_err(unit_error)?;
        }

        if instance::run_reactor(&mut self.store, instance).map_err(RunnerError::from_execution)? {
            debug!("Reactor entry points returned");
        }
        Ok(())
    }

    /// Drain deferred jobs. Failing jobs are dispatched as unhandled
    /// rejections; the first one no listener prevented is kept for
    /// [`Runner::take_unhandled`]. Returns the number of jobs run.
    pub fn run_event_loop(&mut self) -> usize {
        let mut processed = 0;
        while let Some(job) = self.store.data_mut().take_job() {
            processed += 1;
            if let Err(err) = job(&mut self.store) {
                let reason = RunnerError::from_execution(err);
                self.state = match reason.exit_code() {
                    Some(code) => InstanceState::Exited(code),
                    None => InstanceState::Crashed,
                };
                let event = self.rejections.dispatch(reason);
                if !event.default_prevented() && self.unhandled.is_none() {
                    self.unhandled = Some(event.into_reason());
                }
            }
        }
        processed
    }

    /// Take the first rejection no listener handled
    pub fn take_unhandled(&mut self) -> Option<RunnerError> {
        self.unhandled.take()
    }

    /// Runner id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The store data
    pub fn state(&self) -> &RunnerState {
        self.store.data()
    }

    /// The store
    pub fn store(&self) -> &Store<RunnerState> {
        &self.store
    }

    /// The virtual filesystem
    pub fn fs(&self) -> &VirtualFs {
        self.store.data().fs()
    }

    /// Lifecycle state
    pub fn instance_state(&self) -> InstanceState {
        self.state
    }

    /// Metrics of the last run
    pub fn metrics(&self) -> Option<&RunMetrics> {
        self.metrics.as_ref()
    }

    /// The engine this runner runs on
    pub fn engine(&self) -> &RunnerEngine {
        &self.engine
    }

    /// Handle interrupting this runner's module
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.engine.interrupt_handle()
    }
}

/// Failures raised by the unit itself are import unit errors; the exit
/// signal and traps of module code it calls keep their meaning.
fn unit_error(err: anyhow::Error) -> RunnerError {
    match RunnerError::from_execution(err) {
        RunnerError::Host(message) => RunnerError::ImportUnit(message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::imports::{HostFunc, ImportNamespace};
    use crate::host_functions::clock::Clocks;
    use crate::unit::bridge::RuntimeBridge;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use wasmtime::ValType;

    fn quiet_options() -> RunnerOptions {
        RunnerOptions::new().with_config(RunnerConfig::new().with_mirror_console(false))
    }

    fn recorder(log: Arc<Mutex<Vec<i32>>>) -> ImportNamespace {
        ImportNamespace::new().with_func(
            "record",
            HostFunc::new([ValType::I32], [], move |_caller, params, _results| {
                log.lock().push(params[0].unwrap_i32());
                Ok(())
            }),
        )
    }

    const HELLO: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 16) "hello\n")
          (func (export "_start")
            (i32.store (i32.const 0) (i32.const 16))
            (i32.store (i32.const 4) (i32.const 6))
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 32)))))
    "#;

    #[test]
    fn test_stdout_interception() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let options = quiet_options().on_stdout(move |text| seen_clone.lock().push(text.to_string()));

        let mut runner = Runner::new(options, None).unwrap();
        runner.run(HELLO.as_bytes(), None).unwrap();

        assert_eq!(seen.lock().as_slice(), ["hello\n"]);
        assert_eq!(runner.fs().stdout_contents(), "hello\n");
        assert_eq!(runner.instance_state(), InstanceState::Settled);

        let view = runner.state().memory_view().unwrap();
        assert_eq!(view.read_u32(runner.store(), 32).unwrap(), 6);
    }

    // Writes 2 MiB of stdout, retrying on short writes like libc does.
    const FLOOD: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 40)
          (func (export "_start")
            (local $off i32)
            (local $left i32)
            (local.set $off (i32.const 1024))
            (local.set $left (i32.const 2097152))
            (block $done
              (loop $again
                (br_if $done (i32.eqz (local.get $left)))
                (i32.store (i32.const 0) (local.get $off))
                (i32.store (i32.const 4) (local.get $left))
                (br_if $done (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))
                (local.set $off (i32.add (local.get $off) (i32.load (i32.const 8))))
                (local.set $left (i32.sub (local.get $left) (i32.load (i32.const 8))))
                (br $again)))
            (i32.store (i32.const 12) (local.get $left))))
    "#;

    #[test]
    fn test_large_output_is_written_once_in_full() {
        let forwarded = Arc::new(Mutex::new(0usize));
        let forwarded_clone = Arc::clone(&forwarded);
        let options = quiet_options().on_stdout(move |text| *forwarded_clone.lock() += text.len());

        let mut runner = Runner::new(options, None).unwrap();
        runner.run(FLOOD.as_bytes(), None).unwrap();

        let view = runner.state().memory_view().unwrap();
        assert_eq!(view.read_u32(runner.store(), 12).unwrap(), 0);
        assert_eq!(runner.fs().stdout_contents().len(), 2 * 1024 * 1024);
        assert_eq!(*forwarded.lock(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_oversized_iovec_count_is_rejected() {
        let wat = r#"
            (module
              (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (func (export "_start")
                (i32.store (i32.const 100)
                  (call $fd_write (i32.const 1) (i32.const 0) (i32.const -1) (i32.const 8)))))
        "#;

        let mut runner = Runner::new(quiet_options(), None).unwrap();
        match runner.run(wat.as_bytes(), None) {
            Ok(()) => {
                let view = runner.state().memory_view().unwrap();
                assert_ne!(view.read_u32(runner.store(), 100).unwrap(), 0);
            }
            Err(err) => assert!(matches!(err, RunnerError::Trap { .. } | RunnerError::Host(_))),
        }
        assert!(runner.fs().stdout_contents().is_empty());
    }

    #[test]
    fn test_proc_exit_is_exit_signal() {
        let wat = r#"
            (module
              (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
              (memory (export "memory") 1)
              (func (export "_start") (call $exit (i32.const 5))))
        "#;

        let mut runner = Runner::new(quiet_options(), None).unwrap();
        let err = runner.run(wat.as_bytes(), None).unwrap_err();

        assert_eq!(err.exit_code(), Some(5));
        assert_eq!(runner.instance_state(), InstanceState::Exited(5));
        assert_eq!(runner.metrics().unwrap().exit_code, Some(5));
    }

    const OVERFLOW: &str = r#"
        (module
          (import "__stack_sanitizer" "report_stack_overflow" (func $overflow))
          (func (export "_start") (call $overflow)))
    "#;

    #[test]
    fn test_stack_sanitizer_fails() {
        let mut runner = Runner::new(quiet_options(), None).unwrap();
        let err = runner.run(OVERFLOW.as_bytes(), None).unwrap_err();

        assert!(matches!(err, RunnerError::StackOverflow));
        assert_eq!(err.to_string(), "Detected stack buffer overflow.");
        assert_eq!(runner.instance_state(), InstanceState::Crashed);
    }

    #[test]
    fn test_sanitizer_overrides_caller_namespace() {
        let extras = ImportObject::new().with_namespace(
            SANITIZER_NAMESPACE,
            ImportNamespace::new().with_func("report_stack_overflow", HostFunc::new([], [], |_, _, _| Ok(()))),
        );

        let mut runner = Runner::new(quiet_options(), None).unwrap();
        let err = runner.run(OVERFLOW.as_bytes(), Some(extras)).unwrap_err();
        assert!(matches!(err, RunnerError::StackOverflow));
    }

    #[test]
    fn test_reactor_entry_points_in_order() {
        let wat = r#"
            (module
              (import "env" "record" (func $record (param i32)))
              (func (export "_initialize") (call $record (i32.const 1)))
              (func (export "main") (call $record (i32.const 2))))
        "#;
        let log = Arc::new(Mutex::new(Vec::new()));
        let extras = ImportObject::new().with_namespace("env", recorder(Arc::clone(&log)));

        let mut runner = Runner::new(quiet_options(), None).unwrap();
        runner.run(wat.as_bytes(), Some(extras)).unwrap();

        assert_eq!(log.lock().as_slice(), [1, 2]);
    }

    #[test]
    fn test_reactor_without_main_fails() {
        let wat = r#"(module (func (export "_initialize")))"#;
        let mut runner = Runner::new(quiet_options(), None).unwrap();
        let err = runner.run(wat.as_bytes(), None).unwrap_err();
        assert!(matches!(err, RunnerError::Host(_)));
    }

    struct RecordingUnit {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl ImportUnit for RecordingUnit {
        fn import_object(&self) -> ImportObject {
            let events = Arc::clone(&self.events);
            ImportObject::new().with_namespace(
                "env",
                ImportNamespace::new().with_func(
                    "record",
                    HostFunc::new([ValType::I32], [], move |_caller, params, _results| {
                        events.lock().push(format!("unit:{}", params[0].unwrap_i32()));
                        Ok(())
                    }),
                ),
            )
        }

        fn set_context(&mut self, _store: &mut Store<RunnerState>, context: &Context) -> anyhow::Result<()> {
            assert!(context.require.is_none());
            self.events.lock().push("set_context".into());
            Ok(())
        }

        fn start(&mut self, _store: &mut Store<RunnerState>) -> anyhow::Result<()> {
            self.events.lock().push("start".into());
            Ok(())
        }
    }

    const RECORD_START: &str = r#"
        (module
          (import "env" "record" (func $record (param i32)))
          (func (export "_start") (call $record (i32.const 7))))
    "#;

    #[test]
    fn test_unit_lifecycle_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let class = ImportUnitClass::from_unit(move || {
            Box::new(RecordingUnit {
                events: Arc::clone(&events_clone),
            })
        });

        let mut runner = Runner::new(quiet_options(), Some(class)).unwrap();
        runner.run(RECORD_START.as_bytes(), None).unwrap();

        assert_eq!(events.lock().as_slice(), ["set_context", "unit:7", "start"]);
    }

    #[test]
    fn test_extras_replace_unit_namespace() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let class = ImportUnitClass::from_unit(move || {
            Box::new(RecordingUnit {
                events: Arc::clone(&events_clone),
            })
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let extras = ImportObject::new().with_namespace("env", recorder(Arc::clone(&log)));

        let mut runner = Runner::new(quiet_options(), Some(class)).unwrap();
        runner.run(RECORD_START.as_bytes(), Some(extras)).unwrap();

        assert_eq!(log.lock().as_slice(), [7]);
        assert_eq!(events.lock().as_slice(), ["set_context", "start"]);
    }

    #[test]
    fn test_failing_unit_is_import_unit_error() {
        struct FailingUnit;

        impl ImportUnit for FailingUnit {
            fn import_object(&self) -> ImportObject {
                ImportObject::new()
            }

            fn set_context(&mut self, _store: &mut Store<RunnerState>, _context: &Context) -> anyhow::Result<()> {
                anyhow::bail!("bridge unavailable")
            }
        }

        let class = ImportUnitClass::from_unit(|| Box::new(FailingUnit));
        let mut runner = Runner::new(quiet_options(), Some(class)).unwrap();
        let err = runner.run(b"(module)", None).unwrap_err();
        assert!(matches!(err, RunnerError::ImportUnit(_)));
    }

    #[test]
    fn test_clock_res_get_refreshes_memory_view() {
        let wat = r#"
            (module
              (import "wasi_snapshot_preview1" "clock_res_get"
                (func $res (param i32 i32) (result i32)))
              (memory (export "memory") 1)
              (func (export "_start")
                (drop (memory.grow (i32.const 1)))
                (drop (call $res (i32.const 1) (i32.const 70000)))))
        "#;

        let mut runner = Runner::new(quiet_options(), None).unwrap();
        runner.run(wat.as_bytes(), None).unwrap();

        let view = runner.state().memory_view().unwrap();
        assert_eq!(view.byte_len(), 131072);
        assert_eq!(view.read(runner.store(), 70000, 8).unwrap(), 1u64.to_le_bytes().to_vec());
    }

    struct CoarseClock;

    impl wasmtime_wasi::HostWallClock for CoarseClock {
        fn resolution(&self) -> Duration {
            Duration::from_millis(1)
        }

        fn now(&self) -> Duration {
            Duration::from_secs(1_700_000_000)
        }
    }

    #[test]
    fn test_clock_res_get_reads_installed_clock() {
        let wat = r#"
            (module
              (import "wasi_snapshot_preview1" "clock_res_get"
                (func $res (param i32 i32) (result i32)))
              (memory (export "memory") 1)
              (func (export "_start")
                (i32.store (i32.const 16) (call $res (i32.const 0) (i32.const 0)))
                (i32.store (i32.const 20) (call $res (i32.const 2) (i32.const 8)))))
        "#;

        let options = quiet_options().with_clocks(Clocks::new().with_wall_clock(CoarseClock));
        let mut runner = Runner::new(options, None).unwrap();
        runner.run(wat.as_bytes(), None).unwrap();

        let view = runner.state().memory_view().unwrap();
        assert_eq!(view.read(runner.store(), 0, 8).unwrap(), 1_000_000u64.to_le_bytes().to_vec());
        assert_eq!(view.read_u32(runner.store(), 16).unwrap(), 0);
        assert_eq!(view.read_u32(runner.store(), 20).unwrap(), crate::error::errno::INVAL as u32);
    }

    struct FlagBridge {
        bound: Arc<AtomicBool>,
    }

    impl RuntimeBridge for FlagBridge {
        fn wasm_imports(&self) -> ImportNamespace {
            ImportNamespace::new().with_func("swjs_release", HostFunc::new([ValType::I32], [], |_, _, _| Ok(())))
        }

        fn set_instance(&mut self, _store: &mut Store<RunnerState>, _instance: &Instance) -> anyhow::Result<()> {
            self.bound.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bridge_class(bound: Arc<AtomicBool>) -> ImportUnitClass {
        ImportUnitClass::from_bridge(move || {
            Box::new(FlagBridge {
                bound: Arc::clone(&bound),
            })
        })
    }

    #[test]
    fn test_bridge_binds_with_marker_export() {
        let wat = r#"
            (module
              (import "javascript_kit" "swjs_release" (func (param i32)))
              (func (export "swjs_library_version") (result i32) (i32.const 708)))
        "#;
        let bound = Arc::new(AtomicBool::new(false));

        let mut runner = Runner::new(quiet_options(), Some(bridge_class(Arc::clone(&bound)))).unwrap();
        runner.run(wat.as_bytes(), None).unwrap();
        assert!(bound.load(Ordering::SeqCst));
    }

    #[test]
    fn test_bridge_unbound_without_marker_export() {
        let bound = Arc::new(AtomicBool::new(false));

        let mut runner = Runner::new(quiet_options(), Some(bridge_class(Arc::clone(&bound)))).unwrap();
        runner.run(b"(module)", None).unwrap();
        assert!(!bound.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalid_bytes_fail_compilation() {
        let mut runner = Runner::new(quiet_options(), None).unwrap();
        let err = runner.run(b"\0asm\x01\0\0\0garbage", None).unwrap_err();
        assert!(matches!(err, RunnerError::Compilation(_)));
    }

    #[test]
    fn test_missing_import_fails_instantiation() {
        let wat = r#"(module (import "env" "absent" (func)))"#;
        let mut runner = Runner::new(quiet_options(), None).unwrap();
        let err = runner.run(wat.as_bytes(), None).unwrap_err();
        assert!(matches!(err, RunnerError::Instantiation(_)));
    }

    #[test]
    fn test_deferred_exit_is_dispatched() {
        let wat = r#"
            (module
              (import "env" "defer" (func $defer))
              (func (export "_start") (call $defer)))
        "#;
        let extras = ImportObject::new().with_namespace(
            "env",
            ImportNamespace::new().with_func(
                "defer",
                HostFunc::new([], [], |mut caller, _params, _results| {
                    caller
                        .data_mut()
                        .enqueue_job(|_store| Err(wasmtime_wasi::I32Exit(0).into()));
                    Ok(())
                }),
            ),
        );

        let codes = Arc::new(Mutex::new(Vec::new()));
        let codes_clone = Arc::clone(&codes);
        let mut runner = Runner::new(quiet_options(), None).unwrap();
        runner.on_unhandled_rejection(move |event| {
            event.prevent_default();
            codes_clone.lock().push(event.reason().exit_code());
        });

        runner.run(wat.as_bytes(), Some(extras)).unwrap();
        assert_eq!(runner.state().pending_jobs(), 1);
        assert_eq!(runner.run_event_loop(), 1);

        assert_eq!(codes.lock().as_slice(), [Some(0)]);
        assert_eq!(runner.instance_state(), InstanceState::Exited(0));
        assert!(runner.take_unhandled().is_none());
    }

    #[test]
    fn test_unprevented_rejection_is_kept() {
        let mut runner = Runner::new(quiet_options(), None).unwrap();
        runner.run(b"(module)", None).unwrap();

        runner
            .store
            .data_mut()
            .enqueue_job(|_store| Err(anyhow::anyhow!("late failure")));
        assert_eq!(runner.run_event_loop(), 1);

        let reason = runner.take_unhandled().unwrap();
        assert_eq!(reason.to_string(), "late failure");
        assert_eq!(runner.instance_state(), InstanceState::Crashed);
    }

    #[test]
    fn test_second_run_hits_module_cache() {
        let mut runner = Runner::new(quiet_options(), None).unwrap();
        runner.run(b"(module)", None).unwrap();
        assert!(!runner.metrics().unwrap().cache_hit);

        runner.run(b"(module)", None).unwrap();
        assert!(runner.metrics().unwrap().cache_hit);
    }

    #[test]
    fn test_interrupt_stops_running_module() {
        let config = RunnerConfig::new()
            .with_mirror_console(false)
            .with_epoch_interruption(true);
        let mut runner = Runner::new(RunnerOptions::new().with_config(config), None).unwrap();

        let handle = runner.interrupt_handle();
        std::thread::spawn(move || {
            for _ in 0..250 {
                std::thread::sleep(Duration::from_millis(20));
                handle.interrupt();
            }
        });

        let wat = r#"(module (func (export "_start") (loop (br 0))))"#;
        let err = runner.run(wat.as_bytes(), None).unwrap_err();
        assert!(matches!(err, RunnerError::Trap { .. }));
    }
}
