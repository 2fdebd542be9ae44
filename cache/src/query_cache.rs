use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use common::value::DocId;

use crate::compressor::ResultCompressor;

/// SHA-256 of the canonical fingerprint.
pub type CacheKey = [u8; 32];

/// Interval of the background LRU promotion worker.
const LRU_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Why a lookup missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissKind {
    NotFound,
    Invalidated,
    /// Counted as not-found in the statistics.
    Expired,
}

/// Successful lookup: the decompressed result plus the metadata copied out
/// while the shared lock was still held.
#[derive(Debug)]
pub struct LookupHit {
    pub doc_ids: Vec<DocId>,
    pub query_cost_ms: f64,
    pub created_at: Instant,
}

struct CacheEntry {
    compressed: Vec<u8>,
    /// Element count of the uncompressed result.
    original_count: usize,
    query_cost_ms: f64,
    created_at: Instant,
    last_accessed: Instant,
    /// Relaxed hit-path tracking; the background worker folds these into the
    /// recency list under the exclusive lock.
    access_count: AtomicU64,
    accessed_since_refresh: AtomicBool,
    invalidated: AtomicBool,
    table: String,
    ngrams: BTreeSet<String>,
}

impl CacheEntry {
    /// The one memory formula. Insert adds exactly this; erase and eviction
    /// subtract exactly this. Asymmetry here means slow leaks or underflow.
    fn memory_usage(&self) -> usize {
        self.compressed.len()
            + self.table.len()
            + self.ngrams.iter().map(|g| g.len() + 16).sum::<usize>()
            + std::mem::size_of::<CacheKey>()
            + 160
    }
}

struct CacheInner {
    map: HashMap<CacheKey, CacheEntry>,
    /// Recency list, most recent at the front. Only touched under the
    /// exclusive lock (insert, erase, eviction, the refresh worker).
    lru: VecDeque<CacheKey>,
    total_memory_bytes: usize,
}

#[derive(Default)]
struct CacheStats {
    total_queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    misses_not_found: AtomicU64,
    misses_invalidated: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    total_hit_time_us: AtomicU64,
    total_miss_time_us: AtomicU64,
    total_saved_time_us: AtomicU64,
}

/// Point-in-time statistics for CACHE STATS.
#[derive(Debug, Clone, Default)]
pub struct CacheStatsSnapshot {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub misses_not_found: u64,
    pub misses_invalidated: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub current_entries: u64,
    pub current_memory_bytes: u64,
    pub max_memory_bytes: u64,
    pub total_hit_time_ms: f64,
    pub total_miss_time_ms: f64,
    pub total_saved_time_ms: f64,
}

/// Memory-bounded, TTL-aware, LRU-evicting map from query fingerprints to
/// compressed result sets.
///
/// Reads run under the shared lock with per-entry atomics for access
/// tracking and invalidation; list surgery happens on a dedicated worker.
/// The lock is never upgraded: any exclusive action triggered from the read
/// path re-acquires and re-looks-up, verifying the entry's `created_at`
/// stamp (an evicted-and-replaced entry fails the check and the action is
/// abandoned).
pub struct QueryCache {
    inner: RwLock<CacheInner>,
    max_memory_bytes: usize,
    min_query_cost_ms: f64,
    /// 0 disables TTL expiry.
    ttl_seconds: u64,
    stats: CacheStats,
    should_stop: Arc<AtomicBool>,
    refresh_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueryCache {
    pub fn new(max_memory_bytes: usize, min_query_cost_ms: f64, ttl_seconds: u64) -> Arc<QueryCache> {
        let cache = Arc::new(QueryCache {
            inner: RwLock::new(CacheInner {
                map: HashMap::new(),
                lru: VecDeque::new(),
                total_memory_bytes: 0,
            }),
            max_memory_bytes,
            min_query_cost_ms,
            ttl_seconds,
            stats: CacheStats::default(),
            should_stop: Arc::new(AtomicBool::new(false)),
            refresh_handle: Mutex::new(None),
        });

        let weak: Weak<QueryCache> = Arc::downgrade(&cache);
        let should_stop = Arc::clone(&cache.should_stop);
        let handle = thread::Builder::new()
            .name("cache-lru-refresh".to_string())
            .spawn(move || loop {
                thread::sleep(LRU_REFRESH_INTERVAL);
                if should_stop.load(Ordering::Acquire) {
                    break;
                }
                match weak.upgrade() {
                    Some(cache) => cache.refresh_lru(),
                    None => break,
                }
            })
            .expect("spawn cache-lru-refresh worker");
        *cache.refresh_handle.lock().unwrap() = Some(handle);

        cache
    }

    /// Stops the background worker. Called on shutdown; Drop is the backstop.
    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.refresh_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn lookup(&self, key: &CacheKey) -> Result<LookupHit, MissKind> {
        let start = Instant::now();
        let inner = self.inner.read().unwrap();
        self.stats.total_queries.fetch_add(1, Ordering::Relaxed);

        let Some(entry) = inner.map.get(key) else {
            return Err(self.record_miss(MissKind::NotFound, start));
        };

        if entry.invalidated.load(Ordering::Acquire) {
            return Err(self.record_miss(MissKind::Invalidated, start));
        }

        if self.ttl_seconds > 0 && entry.created_at.elapsed().as_secs() >= self.ttl_seconds {
            return Err(self.record_miss(MissKind::Expired, start));
        }

        let doc_ids = match ResultCompressor::decompress(&entry.compressed, entry.original_count) {
            Ok(doc_ids) => doc_ids,
            Err(e) => {
                warn!(event = "cache_error", error = %e, "cache entry failed to decompress, treating as miss");
                let created_at = entry.created_at;
                let miss = self.record_miss(MissKind::NotFound, start);
                drop(inner);
                self.erase_if_unchanged(key, created_at);
                return Err(miss);
            }
        };

        // Copies taken before the lock is released; the entry may be evicted
        // the instant it is.
        let query_cost_ms = entry.query_cost_ms;
        let created_at = entry.created_at;

        entry.access_count.fetch_add(1, Ordering::Relaxed);
        entry.accessed_since_refresh.store(true, Ordering::Relaxed);

        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_hit_time_us
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.stats
            .total_saved_time_us
            .fetch_add((query_cost_ms * 1000.0) as u64, Ordering::Relaxed);

        Ok(LookupHit {
            doc_ids,
            query_cost_ms,
            created_at,
        })
    }

    fn record_miss(&self, kind: MissKind, start: Instant) -> MissKind {
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        match kind {
            // Expired entries are counted as not-found.
            MissKind::NotFound | MissKind::Expired => {
                self.stats.misses_not_found.fetch_add(1, Ordering::Relaxed);
            }
            MissKind::Invalidated => {
                self.stats.misses_invalidated.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.stats
            .total_miss_time_us
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        kind
    }

    /// Exclusive-path cleanup triggered from the read path: re-acquire,
    /// re-look-up, and verify the stamp before acting.
    fn erase_if_unchanged(&self, key: &CacheKey, created_at: Instant) {
        let mut inner = self.inner.write().unwrap();
        let unchanged = inner
            .map
            .get(key)
            .map(|entry| entry.created_at == created_at)
            .unwrap_or(false);
        if unchanged {
            Self::remove_entry(&mut inner, key);
        } else {
            // The entry was evicted and possibly replaced while the lock was
            // dropped; touching it now would hit the wrong entry.
            debug!(event = "cache_debug", action = "aba_recheck_abandoned");
        }
    }

    /// Admits the (pre-pagination) result when the query was expensive
    /// enough and it fits the budget, evicting from the LRU tail as needed.
    pub fn insert(
        &self,
        key: CacheKey,
        doc_ids: &[DocId],
        query_cost_ms: f64,
        table: String,
        ngrams: BTreeSet<String>,
    ) -> bool {
        if query_cost_ms < self.min_query_cost_ms {
            return false;
        }

        let now = Instant::now();
        let entry = CacheEntry {
            compressed: ResultCompressor::compress(doc_ids),
            original_count: doc_ids.len(),
            query_cost_ms,
            created_at: now,
            last_accessed: now,
            access_count: AtomicU64::new(0),
            accessed_since_refresh: AtomicBool::new(false),
            invalidated: AtomicBool::new(false),
            table,
            ngrams,
        };
        let entry_memory = entry.memory_usage();
        if entry_memory > self.max_memory_bytes {
            return false;
        }

        let mut inner = self.inner.write().unwrap();
        if inner.map.contains_key(&key) {
            return false;
        }

        if inner.total_memory_bytes + entry_memory > self.max_memory_bytes
            && !self.evict_for_space(&mut inner, entry_memory)
        {
            return false;
        }

        inner.lru.push_front(key);
        inner.total_memory_bytes += entry_memory;
        inner.map.insert(key, entry);
        true
    }

    /// Pops from the recency tail until `required_bytes` more would fit.
    fn evict_for_space(&self, inner: &mut CacheInner, required_bytes: usize) -> bool {
        while inner.total_memory_bytes + required_bytes > self.max_memory_bytes {
            let Some(lru_key) = inner.lru.back().copied() else {
                break;
            };
            if Self::remove_entry(inner, &lru_key) {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        inner.total_memory_bytes + required_bytes <= self.max_memory_bytes
    }

    /// Removes one entry and its recency-list node, subtracting the same
    /// memory figure the insert added.
    fn remove_entry(inner: &mut CacheInner, key: &CacheKey) -> bool {
        let Some(entry) = inner.map.remove(key) else {
            // Stale list node with no map entry: drop the node.
            if let Some(pos) = inner.lru.iter().position(|k| k == key) {
                inner.lru.remove(pos);
            }
            return false;
        };
        inner.total_memory_bytes -= entry.memory_usage();
        if let Some(pos) = inner.lru.iter().position(|k| k == key) {
            inner.lru.remove(pos);
        }
        true
    }

    /// Flags the entry stale without taking the exclusive lock.
    pub fn mark_invalidated(&self, key: &CacheKey) -> bool {
        let inner = self.inner.read().unwrap();
        match inner.map.get(key) {
            Some(entry) => {
                entry.invalidated.store(true, Ordering::Release);
                self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Flags every entry whose fingerprint names `table`. Shared lock only.
    pub fn invalidate_table(&self, table: &str) -> usize {
        let inner = self.inner.read().unwrap();
        let mut flagged = 0;
        for entry in inner.map.values() {
            if entry.table == table && !entry.invalidated.swap(true, Ordering::AcqRel) {
                flagged += 1;
            }
        }
        if flagged > 0 {
            self.stats.invalidations.fetch_add(flagged as u64, Ordering::Relaxed);
        }
        flagged
    }

    pub fn erase(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.write().unwrap();
        Self::remove_entry(&mut inner, key)
    }

    /// Drops every entry for one table. Exclusive lock.
    pub fn clear_table(&self, table: &str) -> usize {
        let mut inner = self.inner.write().unwrap();
        let keys: Vec<CacheKey> = inner
            .map
            .iter()
            .filter(|(_, entry)| entry.table == table)
            .map(|(key, _)| *key)
            .collect();
        let mut removed = 0;
        for key in &keys {
            if Self::remove_entry(&mut inner, key) {
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.map.clear();
        inner.lru.clear();
        inner.total_memory_bytes = 0;
    }

    /// Folds the relaxed access flags into the recency list. Runs on the
    /// dedicated worker so the hot path never does list surgery.
    pub fn refresh_lru(&self) {
        let mut inner = self.inner.write().unwrap();
        let now = Instant::now();

        let touched: Vec<CacheKey> = inner
            .map
            .iter()
            .filter(|(_, entry)| entry.accessed_since_refresh.swap(false, Ordering::Relaxed))
            .map(|(key, _)| *key)
            .collect();

        for key in touched {
            if let Some(pos) = inner.lru.iter().position(|k| k == &key) {
                inner.lru.remove(pos);
                inner.lru.push_front(key);
            }
            if let Some(entry) = inner.map.get_mut(&key) {
                entry.last_accessed = now;
            }
        }
    }

    pub fn entry_count(&self) -> usize {
        self.inner.read().unwrap().map.len()
    }

    pub fn total_memory_bytes(&self) -> usize {
        self.inner.read().unwrap().total_memory_bytes
    }

    /// Invariant check used by tests: the tracked total equals the sum of
    /// the per-entry formula.
    pub fn memory_accounting_consistent(&self) -> bool {
        let inner = self.inner.read().unwrap();
        let summed: usize = inner.map.values().map(|entry| entry.memory_usage()).sum();
        summed == inner.total_memory_bytes
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let inner = self.inner.read().unwrap();
        CacheStatsSnapshot {
            total_queries: self.stats.total_queries.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            misses_not_found: self.stats.misses_not_found.load(Ordering::Relaxed),
            misses_invalidated: self.stats.misses_invalidated.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            current_entries: inner.map.len() as u64,
            current_memory_bytes: inner.total_memory_bytes as u64,
            max_memory_bytes: self.max_memory_bytes as u64,
            total_hit_time_ms: self.stats.total_hit_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
            total_miss_time_ms: self.stats.total_miss_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
            total_saved_time_ms: self.stats.total_saved_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

impl Drop for QueryCache {
    fn drop(&mut self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.refresh_handle.get_mut().unwrap().take() {
            let _ = handle.join();
        }
    }
}
