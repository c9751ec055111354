//! Import units.
//!
//! An import unit is an optional companion runtime attached to a runner.
//! It contributes namespaces to the import object, is handed the live
//! instance once it exists and is started after the system interface.
//!
//! Units come in two shapes, selected through [`ImportUnitClass`]: a plain
//! [`ImportUnit`] implementation, or a [`RuntimeBridge`](bridge::RuntimeBridge)
//! wrapped by the [`BridgedRuntime`](bridge::BridgedRuntime) adapter.

pub mod bridge;
pub mod loader;

use crate::context::{Context, RunnerState};
use crate::engine::imports::ImportObject;
use bridge::{BridgedRuntime, RuntimeBridge};
use std::sync::Arc;
use wasmtime::Store;

/// A companion runtime attached to a runner
pub trait ImportUnit: Send {
    /// Namespaces this unit provides; merged before the system interface
    fn import_object(&self) -> ImportObject;

    /// Receive the live instance. Called once per run, before the system
    /// interface starts.
    fn set_context(&mut self, store: &mut Store<RunnerState>, context: &Context) -> anyhow::Result<()>;

    /// Start the unit. Called after the system interface started.
    fn start(&mut self, _store: &mut Store<RunnerState>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Constructor of a plain import unit
pub type UnitFactory = Arc<dyn Fn() -> Box<dyn ImportUnit> + Send + Sync>;

/// Constructor of a runtime bridge
pub type BridgeFactory = Arc<dyn Fn() -> Box<dyn RuntimeBridge> + Send + Sync>;

/// A usable import unit class
#[derive(Clone)]
pub enum ImportUnitClass {
    /// A plain import unit
    Unit(UnitFactory),
    /// A runtime bridge, adapted by [`BridgedRuntime`]
    RuntimeBridge(BridgeFactory),
}

impl ImportUnitClass {
    /// Class of a plain import unit
    pub fn from_unit<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn ImportUnit> + Send + Sync + 'static,
    {
        ImportUnitClass::Unit(Arc::new(factory))
    }

    /// Class adapting a runtime bridge
    pub fn from_bridge<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn RuntimeBridge> + Send + Sync + 'static,
    {
        ImportUnitClass::RuntimeBridge(Arc::new(factory))
    }

    /// Construct one unit
    pub fn instantiate(&self) -> Box<dyn ImportUnit> {
        match self {
            ImportUnitClass::Unit(factory) => factory(),
            ImportUnitClass::RuntimeBridge(factory) => Box::new(BridgedRuntime::new(factory())),
        }
    }

    /// Whether this class encapsulates a runtime bridge
    pub fn wraps_runtime_bridge(&self) -> bool {
        matches!(self, ImportUnitClass::RuntimeBridge(_))
    }
}

impl std::fmt::Debug for ImportUnitClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportUnitClass::Unit(_) => f.write_str("ImportUnitClass::Unit"),
            ImportUnitClass::RuntimeBridge(_) => f.write_str("ImportUnitClass::RuntimeBridge"),
        }
    }
}
