//! Runtime bridge adapter.
//!
//! A runtime bridge exposes a fixed `javascript_kit` import namespace and
//! needs the instance once it exists. [`BridgedRuntime`] turns a bridge
//! into an [`ImportUnit`]: the instance is only handed over when the
//! module was built against the bridge, which it signals by exporting
//! `swjs_library_version`.

use super::ImportUnit;
use crate::context::{Context, RunnerState};
use crate::engine::imports::{ImportNamespace, ImportObject};
use tracing::debug;
use wasmtime::{Instance, Store};

/// Namespace of the bridge imports
pub const BRIDGE_NAMESPACE: &str = "javascript_kit";

/// Export marking a module built against the bridge
pub const LIBRARY_VERSION_EXPORT: &str = "swjs_library_version";

/// A host runtime bridge
pub trait RuntimeBridge: Send {
    /// The functions of the `javascript_kit` namespace
    fn wasm_imports(&self) -> ImportNamespace;

    /// Bind the bridge to a live instance
    fn set_instance(&mut self, store: &mut Store<RunnerState>, instance: &Instance) -> anyhow::Result<()>;
}

/// Import unit encapsulating a [`RuntimeBridge`]
pub struct BridgedRuntime {
    bridge: Box<dyn RuntimeBridge>,
    bound: bool,
}

impl BridgedRuntime {
    /// Wrap a bridge
    pub fn new(bridge: Box<dyn RuntimeBridge>) -> Self {
        Self {
            bridge,
            bound: false,
        }
    }

    /// Whether the bridge was bound to an instance
    pub fn is_bound(&self) -> bool {
        self.bound
    }
}

impl ImportUnit for BridgedRuntime {
    fn import_object(&self) -> ImportObject {
        ImportObject::new().with_namespace(BRIDGE_NAMESPACE, self.bridge.wasm_imports())
    }

    fn set_context(&mut self, store: &mut Store<RunnerState>, context: &Context) -> anyhow::Result<()> {
        if context
            .instance
            .get_export(&mut *store, LIBRARY_VERSION_EXPORT)
            .is_none()
        {
            debug!("Module does not export {}, runtime bridge left unbound", LIBRARY_VERSION_EXPORT);
            return Ok(());
        }

        self.bridge.set_instance(store, &context.instance)?;
        self.bound = true;
        Ok(())
    }
}
