//! Import unit resolution.
//!
//! A [`ModuleResolver`] maps a specifier to a [`UnitModule`], the set of
//! symbols a companion module exports. [`load`] turns one specifier into
//! an [`ImportUnitClass`]; [`ImportUnitLoader`] walks an ordered list of
//! strategies and keeps the first class found.

use super::{BridgeFactory, ImportUnit, ImportUnitClass, UnitFactory};
use crate::config::{FALLBACK_UNIT_SPECIFIER, PRIMARY_UNIT_SPECIFIER};
use crate::unit::bridge::RuntimeBridge;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Label of the primary import unit in logs
pub const PRIMARY_LABEL: &str = "Import Unit";

/// Label of the fallback runtime in logs
pub const FALLBACK_LABEL: &str = "JavaScriptKit";

/// Symbols exported by a companion module
#[derive(Clone, Default)]
pub struct UnitModule {
    /// `import_unit` export
    pub import_unit: Option<UnitFactory>,
    /// `runtime_bridge` export
    pub runtime_bridge: Option<BridgeFactory>,
}

impl UnitModule {
    /// A module exporting nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Export an import unit
    pub fn with_import_unit<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ImportUnit> + Send + Sync + 'static,
    {
        self.import_unit = Some(Arc::new(factory));
        self
    }

    /// Export a runtime bridge
    pub fn with_runtime_bridge<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn RuntimeBridge> + Send + Sync + 'static,
    {
        self.runtime_bridge = Some(Arc::new(factory));
        self
    }
}

impl std::fmt::Debug for UnitModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitModule")
            .field("import_unit", &self.import_unit.is_some())
            .field("runtime_bridge", &self.runtime_bridge.is_some())
            .finish()
    }
}

/// Module resolution failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Nothing is registered under the specifier
    #[error("module not found: {0}")]
    NotFound(String),

    /// The module exists but could not be evaluated
    #[error("module {specifier} failed to load: {reason}")]
    Failed {
        /// Requested specifier
        specifier: String,
        /// Failure description
        reason: String,
    },
}

/// Resolves module specifiers
pub trait ModuleResolver: Send + Sync {
    /// Resolve `specifier` to the module's exports
    fn resolve(&self, specifier: &str) -> Result<UnitModule, LoadError>;
}

/// Resolver over modules registered by the embedding host.
///
/// A specifier can also be registered as failing, for a module that
/// exists but could not be evaluated.
#[derive(Clone, Default)]
pub struct StaticResolver {
    modules: Arc<RwLock<HashMap<String, Result<UnitModule, String>>>>,
}

impl StaticResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `specifier`, replacing any previous one
    pub fn register(&self, specifier: impl Into<String>, module: UnitModule) {
        self.modules.write().insert(specifier.into(), Ok(module));
    }

    /// Register `specifier` as failing with `reason`
    pub fn register_failure(&self, specifier: impl Into<String>, reason: impl Into<String>) {
        self.modules.write().insert(specifier.into(), Err(reason.into()));
    }

    /// Register a module, builder style
    pub fn with_module(self, specifier: impl Into<String>, module: UnitModule) -> Self {
        self.register(specifier, module);
        self
    }

    /// Register a failing module, builder style
    pub fn with_failed_module(self, specifier: impl Into<String>, reason: impl Into<String>) -> Self {
        self.register_failure(specifier, reason);
        self
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    /// Whether no module is registered
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl ModuleResolver for StaticResolver {
    fn resolve(&self, specifier: &str) -> Result<UnitModule, LoadError> {
        match self.modules.read().get(specifier) {
            Some(Ok(module)) => Ok(module.clone()),
            Some(Err(reason)) => Err(LoadError::Failed {
                specifier: specifier.to_string(),
                reason: reason.clone(),
            }),
            None => Err(LoadError::NotFound(specifier.to_string())),
        }
    }
}

/// Resolve one specifier to an import unit class.
///
/// An `import_unit` export wins over a `runtime_bridge` export. Resolution
/// failures yield `None`.
pub fn load(resolver: &dyn ModuleResolver, specifier: &str) -> Option<ImportUnitClass> {
    let module = match resolver.resolve(specifier) {
        Ok(module) => module,
        Err(e) => {
            debug!(specifier = specifier, error = %e, "Import unit module not loaded");
            return None;
        }
    };

    if let Some(factory) = module.import_unit {
        return Some(ImportUnitClass::Unit(factory));
    }
    if let Some(factory) = module.runtime_bridge {
        return Some(ImportUnitClass::RuntimeBridge(factory));
    }

    debug!(specifier = specifier, "Module exports neither an import unit nor a runtime bridge");
    None
}

/// One way of obtaining an import unit class
pub trait LoadStrategy: Send + Sync {
    /// Name used in logs
    fn label(&self) -> &str;

    /// Try to obtain a class
    fn load(&self) -> Option<ImportUnitClass>;
}

/// Strategy loading a single specifier through a resolver
pub struct SpecifierStrategy {
    label: String,
    specifier: String,
    resolver: Arc<dyn ModuleResolver>,
}

impl SpecifierStrategy {
    /// Create a strategy for `specifier`
    pub fn new(
        label: impl Into<String>,
        specifier: impl Into<String>,
        resolver: Arc<dyn ModuleResolver>,
    ) -> Self {
        Self {
            label: label.into(),
            specifier: specifier.into(),
            resolver,
        }
    }

    /// The specifier loaded
    pub fn specifier(&self) -> &str {
        &self.specifier
    }
}

impl LoadStrategy for SpecifierStrategy {
    fn label(&self) -> &str {
        &self.label
    }

    fn load(&self) -> Option<ImportUnitClass> {
        load(self.resolver.as_ref(), &self.specifier)
    }
}

/// Ordered list of load strategies
#[derive(Default)]
pub struct ImportUnitLoader {
    strategies: Vec<Box<dyn LoadStrategy>>,
}

impl ImportUnitLoader {
    /// Create a loader without strategies
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard chain: the primary import unit, then the bridge runtime
    pub fn standard(resolver: Arc<dyn ModuleResolver>) -> Self {
        Self::new()
            .with_strategy(SpecifierStrategy::new(
                PRIMARY_LABEL,
                PRIMARY_UNIT_SPECIFIER,
                Arc::clone(&resolver),
            ))
            .with_strategy(SpecifierStrategy::new(
                FALLBACK_LABEL,
                FALLBACK_UNIT_SPECIFIER,
                resolver,
            ))
    }

    /// A chain over configured specifiers. The first is labelled as the
    /// primary import unit, every later one as the bridge runtime.
    pub fn from_specifiers(resolver: Arc<dyn ModuleResolver>, specifiers: &[String]) -> Self {
        specifiers
            .iter()
            .enumerate()
            .fold(Self::new(), |loader, (i, specifier)| {
                let label = if i == 0 { PRIMARY_LABEL } else { FALLBACK_LABEL };
                loader.with_strategy(SpecifierStrategy::new(label, specifier.as_str(), Arc::clone(&resolver)))
            })
    }

    /// Append a strategy
    pub fn with_strategy(mut self, strategy: impl LoadStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Number of strategies
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Walk the chain and return the first class found
    pub fn resolve(&self) -> Option<ImportUnitClass> {
        let mut tried: Vec<&str> = Vec::new();

        for (i, strategy) in self.strategies.iter().enumerate() {
            if let Some(class) = strategy.load() {
                if class.wraps_runtime_bridge() {
                    info!("Import Unit encapsulating the JavaScriptKit runtime.");
                }
                return Some(class);
            }

            tried.push(strategy.label());
            if let Some(next) = self.strategies.get(i + 1) {
                info!("{} not available, fallback to {}", strategy.label(), next.label());
            }
        }

        if !tried.is_empty() {
            info!("{} not available, running without any runtime.", dedup(&tried).join(" and "));
        }
        None
    }
}

fn dedup<'a>(labels: &[&'a str]) -> Vec<&'a str> {
    let mut unique: Vec<&str> = Vec::new();
    for label in labels {
        if !unique.contains(label) {
            unique.push(label);
        }
    }
    unique
}
