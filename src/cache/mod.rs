//! Fingerprint-keyed memoization of engine computations.
//!
//! Each distinct (dataset, request) fingerprint owns a once-cell. Concurrent
//! callers with the same fingerprint block on that cell, so the compute
//! function runs at most once and every caller receives the same `Arc`.
//! Failed computations leave the cell empty and are retried on the same
//! cell by the next caller; the slot is dropped only when no caller still
//! holds it.

pub mod fingerprint;

pub use fingerprint::Fingerprint;

use crate::config::CacheConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::Dataset;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Default number of entries kept before LRU eviction.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// A memoized result. Never handed out; callers only see `result`.
struct CacheEntry {
    fingerprint: Fingerprint,
    request: String,
    result: Arc<dyn Any + Send + Sync>,
    built_at: DateTime<Utc>,
}

struct Slot {
    cell: Arc<OnceCell<CacheEntry>>,
    last_used: u64,
}

#[derive(Default)]
struct Table {
    slots: HashMap<Fingerprint, Slot>,
    clock: u64,
}

impl Table {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn ready_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.cell.get().is_some())
            .count()
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    pub evictions: u64,
}

/// Process-scoped, injectable result cache.
pub struct FingerprintCache {
    max_entries: usize,
    table: Mutex<Table>,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl std::fmt::Debug for FingerprintCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintCache")
            .field("max_entries", &self.max_entries)
            .field("stats", &self.stats())
            .finish()
    }
}

impl FingerprintCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            table: Mutex::new(Table::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries)
    }

    /// Return the memoized result for `(dataset, request)`, computing it
    /// with `compute` if no result exists yet.
    ///
    /// Failures from `compute` are wrapped in
    /// [`EngineError::CacheComputation`] and not stored.
    pub fn get_or_compute<Q, T, F>(
        &self,
        dataset: &Dataset,
        request: &Q,
        compute: F,
    ) -> EngineResult<Arc<T>>
    where
        Q: Serialize + ?Sized,
        T: Any + Send + Sync,
        F: FnOnce() -> EngineResult<T>,
    {
        let request_json = serde_json::to_string(request)?;
        let fingerprint = Fingerprint::from_parts(dataset.fingerprint(), &request_json);
        let cell = self.slot(&fingerprint);

        let mut computed = false;
        let outcome = cell.get_or_try_init(|| {
            computed = true;
            debug!(
                "Cache miss {} for {} ({} rows)",
                fingerprint.short(),
                request_json,
                dataset.len()
            );
            match compute() {
                Ok(value) => Ok(CacheEntry {
                    fingerprint: fingerprint.clone(),
                    request: request_json.clone(),
                    result: Arc::new(value),
                    built_at: Utc::now(),
                }),
                Err(err) => Err(EngineError::CacheComputation {
                    fingerprint: fingerprint.to_string(),
                    source: Box::new(err),
                }),
            }
        });

        let entry = match outcome {
            Ok(entry) => entry,
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Computation {} failed: {}", fingerprint.short(), err);
                self.discard_empty(&fingerprint, &cell);
                return Err(err);
            }
        };

        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.evict_over_capacity(&fingerprint);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Cache hit {} (built {}) for {}",
                entry.fingerprint.short(),
                entry.built_at.format("%H:%M:%S%.3f"),
                entry.request
            );
        }

        Arc::clone(&entry.result).downcast::<T>().map_err(|_| {
            EngineError::InvalidRequest(format!(
                "cached result {} has a different type than requested",
                fingerprint.short()
            ))
        })
    }

    /// Number of completed entries.
    pub fn len(&self) -> usize {
        self.lock().ready_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Called when the raw input source changes.
    pub fn clear(&self) {
        let mut table = self.lock();
        let dropped = table.slots.len();
        table.slots.clear();
        info!("Cache cleared ({} entries dropped)", dropped);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // Table updates are single assignments; a poisoned lock is still consistent.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, fingerprint: &Fingerprint) -> Arc<OnceCell<CacheEntry>> {
        let mut table = self.lock();
        let now = table.tick();
        let slot = table
            .slots
            .entry(fingerprint.clone())
            .or_insert_with(|| Slot {
                cell: Arc::new(OnceCell::new()),
                last_used: now,
            });
        slot.last_used = now;
        Arc::clone(&slot.cell)
    }

    fn discard_empty(&self, fingerprint: &Fingerprint, cell: &Arc<OnceCell<CacheEntry>>) {
        let mut table = self.lock();
        // Held by the table and this caller only; waiters keep the slot alive
        // so their retry stays visible to later callers.
        let stale = table.slots.get(fingerprint).is_some_and(|slot| {
            Arc::ptr_eq(&slot.cell, cell)
                && Arc::strong_count(&slot.cell) == 2
                && slot.cell.get().is_none()
        });
        if stale {
            table.slots.remove(fingerprint);
        }
    }

    /// Evict least-recently-used completed entries beyond the cap. The entry
    /// just inserted is never evicted.
    fn evict_over_capacity(&self, keep: &Fingerprint) {
        let mut table = self.lock();
        while table.slots.len() > self.max_entries {
            let victim = table
                .slots
                .iter()
                .filter(|(fp, slot)| *fp != keep && slot.cell.get().is_some())
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(fp, _)| fp.clone());

            match victim {
                Some(fp) => {
                    table.slots.remove(&fp);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!("Evicted cache entry {}", fp.short());
                }
                None => break,
            }
        }
    }
}
