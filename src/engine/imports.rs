//! Import object composition.
//!
//! An [`ImportObject`] maps a module namespace to the functions imported
//! from it. Composition is shallow: merging replaces a whole namespace,
//! last writer wins, and entries of a replaced namespace are dropped.

use crate::context::RunnerState;
use std::collections::BTreeMap;
use std::sync::Arc;
use wasmtime::{Caller, Extern, Func, FuncType, Linker, Store, Val, ValType};

/// Body of a host function defined without a store
pub type HostCallback =
    Arc<dyn Fn(Caller<'_, RunnerState>, &[Val], &mut [Val]) -> anyhow::Result<()> + Send + Sync>;

/// Store-independent host function definition
#[derive(Clone)]
pub struct HostFunc {
    params: Vec<ValType>,
    results: Vec<ValType>,
    callback: HostCallback,
}

impl HostFunc {
    /// Define a host function with the given signature
    pub fn new<F>(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
        callback: F,
    ) -> Self
    where
        F: Fn(Caller<'_, RunnerState>, &[Val], &mut [Val]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
            callback: Arc::new(callback),
        }
    }

    /// Parameter types
    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    /// Result types
    pub fn results(&self) -> &[ValType] {
        &self.results
    }

    fn materialize(&self, store: &mut Store<RunnerState>) -> Func {
        let ty = FuncType::new(
            store.engine(),
            self.params.iter().cloned(),
            self.results.iter().cloned(),
        );
        let callback = Arc::clone(&self.callback);
        Func::new(store, ty, move |caller, params, results| {
            callback(caller, params, results)
        })
    }
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunc")
            .field("params", &self.params)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

/// A single import
#[derive(Clone, Debug)]
pub enum Import {
    /// Host function, instantiated in the runner's store when linked
    Host(HostFunc),
    /// Item already living in the runner's store
    Extern(Extern),
}

/// Functions imported from one namespace
#[derive(Clone, Debug, Default)]
pub struct ImportNamespace {
    items: BTreeMap<String, Import>,
}

impl ImportNamespace {
    /// Create an empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host function
    pub fn with_func(mut self, name: impl Into<String>, func: HostFunc) -> Self {
        self.insert_func(name, func);
        self
    }

    /// Add or replace a host function
    pub fn insert_func(&mut self, name: impl Into<String>, func: HostFunc) {
        self.items.insert(name.into(), Import::Host(func));
    }

    /// Add or replace a store item
    pub fn insert_extern(&mut self, name: impl Into<String>, item: Extern) {
        self.items.insert(name.into(), Import::Extern(item));
    }

    /// Look up an import
    pub fn get(&self, name: &str) -> Option<&Import> {
        self.items.get(name)
    }

    /// Whether `name` is defined
    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    /// Number of imports
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the namespace is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Import names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }
}

/// Namespace → imports mapping handed to the linker
#[derive(Clone, Debug, Default)]
pub struct ImportObject {
    namespaces: BTreeMap<String, ImportNamespace>,
}

impl ImportObject {
    /// Create an empty import object
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a namespace
    pub fn with_namespace(mut self, name: impl Into<String>, namespace: ImportNamespace) -> Self {
        self.insert(name, namespace);
        self
    }

    /// Set a namespace, returning the one it replaced
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        namespace: ImportNamespace,
    ) -> Option<ImportNamespace> {
        self.namespaces.insert(name.into(), namespace)
    }

    /// Look up a namespace
    pub fn namespace(&self, name: &str) -> Option<&ImportNamespace> {
        self.namespaces.get(name)
    }

    /// Whether `name` is defined
    pub fn contains(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    /// Namespace names in order
    pub fn namespace_names(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Shallow merge: every namespace of `other` replaces the one of the
    /// same name in `self`.
    pub fn merge(&mut self, other: ImportObject) {
        for (name, namespace) in other.namespaces {
            self.namespaces.insert(name, namespace);
        }
    }

    /// Define every import in `linker`. Consumes the object: nothing can be
    /// added once linking has started.
    pub(crate) fn link(
        self,
        linker: &mut Linker<RunnerState>,
        store: &mut Store<RunnerState>,
    ) -> anyhow::Result<()> {
        for (module, namespace) in self.namespaces {
            for (name, import) in namespace.items {
                let item = match import {
                    Import::Host(func) => Extern::Func(func.materialize(store)),
                    Import::Extern(item) => item,
                };
                linker.define(&*store, &module, &name, item)?;
            }
        }
        Ok(())
    }
}
