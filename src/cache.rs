//! # Dispatch Strategy Cache
//!
//! Maps [`MethodId`] to its compiled [`ServiceMethod`] for the lifetime of an engine.
//! Entries are write-once and never evicted.
//!
//! ## Concurrency
//!
//! - Hits read an immutable snapshot through [`ArcSwap`], without taking a lock.
//! - A miss claims the method's compile slot. Racers for the same method wait on that
//!   slot and receive the winner's strategy; racers for other methods are unaffected.
//! - The winner publishes a new snapshot; every caller returns the published entry.
//!
//! A failed compilation leaves nothing behind, so the next attempt compiles again
//! and fails the same way.

use crate::error::MethodError;
use crate::method::ServiceMethod;
use crate::template::MethodId;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

type Snapshot = HashMap<MethodId, Arc<ServiceMethod>>;

/// Hit, miss and compilation counters
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub compilations: AtomicU64,
    pub failures: AtomicU64,
}

impl CacheStats {
    pub fn get_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn get_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn get_compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }

    pub fn get_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Write-once cache of compiled dispatch strategies.
#[derive(Default)]
pub struct StrategyCache {
    methods: ArcSwap<Snapshot>,
    slots: DashMap<MethodId, Arc<OnceCell<Arc<ServiceMethod>>>>,
    stats: CacheStats,
}

impl StrategyCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached strategy for `id`, if compiled.
    #[must_use]
    pub fn get(&self, id: MethodId) -> Option<Arc<ServiceMethod>> {
        self.methods.load().get(&id).cloned()
    }

    /// Cached strategy for `id`, compiling it with `compile` on a miss.
    ///
    /// # Errors
    ///
    /// Whatever `compile` reports. Nothing is cached on failure.
    pub fn get_or_compile<F>(&self, id: MethodId, compile: F) -> Result<Arc<ServiceMethod>, MethodError>
    where
        F: FnOnce() -> Result<ServiceMethod, MethodError>,
    {
        if let Some(hit) = self.get(id) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(method = %id, "Strategy cache hit");
            return Ok(hit);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let slot = Arc::clone(&self.slots.entry(id).or_default());
        let compiled = slot.get_or_try_init(|| {
            // Published while we were waiting for the slot
            if let Some(hit) = self.get(id) {
                debug!(method = %id, "Strategy compiled by another thread");
                return Ok(hit);
            }
            self.stats.compilations.fetch_add(1, Ordering::Relaxed);
            compile().map(Arc::new)
        });

        let method = match compiled {
            Ok(method) => Arc::clone(method),
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                error!(method = %id, error = %e, "Service method failed to compile");
                return Err(e);
            }
        };

        self.methods.rcu(|current| {
            if current.contains_key(&id) {
                Arc::clone(current)
            } else {
                let mut next = Snapshot::clone(current);
                next.insert(id, Arc::clone(&method));
                Arc::new(next)
            }
        });
        self.slots.remove(&id);

        let published = self.get(id).unwrap_or(method);
        info!(
            method = %id,
            variant = ?published.variant(),
            cache_size = self.len(),
            "Service method compiled and cached"
        );
        Ok(published)
    }

    /// Number of compiled strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl std::fmt::Debug for StrategyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCache")
            .field("len", &self.len())
            .field("stats", &self.stats)
            .finish()
    }
}
