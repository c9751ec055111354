//! Module compilation and caching.
//!
//! Compiled modules are cached by the SHA-256 of their bytes so a dev
//! reload of unchanged bytes skips compilation.

use crate::error::{Result, RunnerError};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;
use wasmtime::{Engine, Module};

/// Compiled module result
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled module
    pub module: Module,
    /// Hex SHA-256 of the source bytes
    pub key: String,
    /// Whether this was a cache hit
    pub cache_hit: bool,
}

struct CacheEntry {
    module: Module,
    last_used: Instant,
}

/// Cache of compiled modules for one engine
pub struct ModuleCache {
    engine: Engine,
    modules: DashMap<String, CacheEntry>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ModuleCache {
    /// Create a cache holding at most `max_entries` modules
    pub fn new(engine: Engine, max_entries: usize) -> Self {
        Self {
            engine,
            modules: DashMap::new(),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Compile `bytes` (binary or text format), reusing a cached module
    pub fn compile(&self, bytes: &[u8]) -> Result<CompiledModule> {
        let key = cache_key(bytes);

        if let Some(mut entry) = self.modules.get_mut(&key) {
            entry.last_used = Instant::now();
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Module cache hit");
            return Ok(CompiledModule {
                module: entry.module.clone(),
                key,
                cache_hit: true,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| RunnerError::Compilation(format!("{:#}", e)))?;

        self.evict_if_full();
        self.modules.insert(
            key.clone(),
            CacheEntry {
                module: module.clone(),
                last_used: Instant::now(),
            },
        );
        debug!(key = %key, size = bytes.len(), "Compiled module");

        Ok(CompiledModule {
            module,
            key,
            cache_hit: false,
        })
    }

    /// Number of cached modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Cache hits so far
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn evict_if_full(&self) {
        while self.modules.len() >= self.max_entries {
            let oldest = self
                .modules
                .iter()
                .min_by_key(|entry| entry.value().last_used)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.modules.remove(&key);
                }
                None => break,
            }
        }
    }
}

fn cache_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
