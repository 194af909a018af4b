//! Memoized level computations
//!
//! Shared by every container built through one engine. Entries are immutable
//! once inserted; the cache is bounded and evicts the least recently used
//! entry. A lookup and the insertion that follows a miss happen under one
//! lock, so concurrent builds never interleave between them.

use super::{GraphKey, Levels};
use crate::error::ComposeResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Default number of graphs kept
pub const DEFAULT_CAPACITY: usize = 64;

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct Entry {
    levels: Arc<Levels>,
    last_used: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<GraphKey, Entry>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded LRU cache of canonical level lists
pub struct DependencyGraphCache {
    capacity: usize,
    state: Mutex<State>,
}

impl DependencyGraphCache {
    /// A capacity of zero disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`, refreshing its recency
    pub fn get(&self, key: &GraphKey) -> Option<Arc<Levels>> {
        let mut state = self.lock();
        Self::get_locked(&mut state, key)
    }

    /// Insert `levels` under `key`, evicting the least recently used entry if full
    pub fn put(&self, key: GraphKey, levels: Arc<Levels>) {
        let mut state = self.lock();
        self.put_locked(&mut state, key, levels);
    }

    /// Return the cached levels for `key`, computing and inserting them on a
    /// miss. Errors are returned without being cached. The flag reports a hit.
    pub fn get_or_compute(
        &self,
        key: &GraphKey,
        compute: impl FnOnce() -> ComposeResult<Arc<Levels>>,
    ) -> ComposeResult<(Arc<Levels>, bool)> {
        let mut state = self.lock();
        if let Some(levels) = Self::get_locked(&mut state, key) {
            return Ok((levels, true));
        }
        let levels = compute()?;
        self.put_locked(&mut state, key.clone(), Arc::clone(&levels));
        Ok((levels, false))
    }

    fn get_locked(state: &mut State, key: &GraphKey) -> Option<Arc<Levels>> {
        state.clock += 1;
        let now = state.clock;
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_used = now;
                state.hits += 1;
                Some(Arc::clone(&entry.levels))
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    fn put_locked(&self, state: &mut State, key: GraphKey, levels: Arc<Levels>) {
        if self.capacity == 0 {
            return;
        }
        state.clock += 1;
        let now = state.clock;

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.last_used = now;
            return;
        }

        if state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!("Evicting graph {}", oldest.fingerprint());
                state.entries.remove(&oldest);
                state.evictions += 1;
            }
        }

        state.entries.insert(
            key,
            Entry {
                levels,
                last_used: now,
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            entries: state.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

impl Default for DependencyGraphCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for DependencyGraphCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraphCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
