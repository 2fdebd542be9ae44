use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};

use common::config::CacheConfig;
use common::query::Query;
use common::value::DocId;

use crate::normalizer::QueryNormalizer;
use crate::query_cache::{CacheKey, CacheStatsSnapshot, QueryCache};

/// Result of a cache hit, with the metadata the debug path renders.
#[derive(Debug)]
pub struct CachedLookup {
    pub doc_ids: Vec<DocId>,
    pub query_cost_ms: f64,
    pub created_at: Instant,
}

/// Query-facing wrapper: canonicalises, hashes and gates on the enabled
/// flag. A cache constructed with no budget stays unconfigured and cannot
/// be enabled at runtime.
pub struct CacheManager {
    cache: Option<Arc<QueryCache>>,
    enabled: AtomicBool,
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        if config.max_memory_bytes == 0 {
            return CacheManager {
                cache: None,
                enabled: AtomicBool::new(false),
            };
        }
        CacheManager {
            cache: Some(QueryCache::new(
                config.max_memory_bytes,
                config.min_query_cost_ms,
                config.ttl_seconds,
            )),
            enabled: AtomicBool::new(config.enabled),
        }
    }

    /// An unconfigured manager, for deployments without a cache section.
    pub fn disabled() -> Self {
        CacheManager {
            cache: None,
            enabled: AtomicBool::new(false),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.cache.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some() && self.enabled.load(Ordering::Acquire)
    }

    /// Re-enables a configured cache. Returns false when there is nothing
    /// to enable.
    pub fn enable(&self) -> bool {
        if self.cache.is_none() {
            return false;
        }
        self.enabled.store(true, Ordering::Release);
        true
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn key_for(query: &Query) -> Option<CacheKey> {
        let fingerprint = QueryNormalizer::normalize(query);
        if fingerprint.is_empty() {
            return None;
        }
        let digest = Sha256::digest(fingerprint.as_bytes());
        let mut key = CacheKey::default();
        key.copy_from_slice(&digest);
        Some(key)
    }

    pub fn lookup(&self, query: &Query) -> Option<CachedLookup> {
        if !self.is_enabled() {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let key = Self::key_for(query)?;
        match cache.lookup(&key) {
            Ok(hit) => Some(CachedLookup {
                doc_ids: hit.doc_ids,
                query_cost_ms: hit.query_cost_ms,
                created_at: hit.created_at,
            }),
            Err(_) => None,
        }
    }

    /// Stores the full pre-pagination result with its execution cost.
    pub fn insert(&self, query: &Query, doc_ids: &[DocId], ngrams: BTreeSet<String>, query_cost_ms: f64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let Some(cache) = self.cache.as_ref() else {
            return false;
        };
        let Some(key) = Self::key_for(query) else {
            return false;
        };
        cache.insert(key, doc_ids, query_cost_ms, query.table.clone(), ngrams)
    }

    /// Conservative invalidation: every entry naming the table goes stale.
    pub fn invalidate_table(&self, table: &str) -> usize {
        match self.cache.as_ref() {
            Some(cache) => cache.invalidate_table(table),
            None => 0,
        }
    }

    pub fn clear(&self) {
        if let Some(cache) = self.cache.as_ref() {
            cache.clear();
        }
    }

    pub fn clear_table(&self, table: &str) -> usize {
        match self.cache.as_ref() {
            Some(cache) => cache.clear_table(table),
            None => 0,
        }
    }

    pub fn stats(&self) -> Option<CacheStatsSnapshot> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    pub fn stop(&self) {
        if let Some(cache) = self.cache.as_ref() {
            cache.stop();
        }
    }
}
