use common::query::{Query, QueryType};

use crate::handlers::HandlerContext;
use crate::response::ResponseFormatter;

/// CACHE CLEAR / STATS / ENABLE / DISABLE.
pub struct CacheHandler;

impl CacheHandler {
    pub fn handle(ctx: &HandlerContext, query: &Query) -> String {
        if !ctx.cache.is_configured() {
            return ResponseFormatter::error("Cache not configured");
        }
        match query.query_type {
            QueryType::CacheClear => {
                if query.table.is_empty() {
                    ctx.cache.clear();
                    ResponseFormatter::ok()
                } else {
                    if !ctx.catalog.exists(&query.table) {
                        return ResponseFormatter::error(format!("Table not found: {}", query.table));
                    }
                    let removed = ctx.cache.clear_table(&query.table);
                    ResponseFormatter::ok_value(removed)
                }
            }
            QueryType::CacheStats => {
                let Some(stats) = ctx.cache.stats() else {
                    return ResponseFormatter::error("Cache not configured");
                };
                let lines = vec![
                    format!("enabled={}", ctx.cache.is_enabled()),
                    format!("total_queries={}", stats.total_queries),
                    format!("cache_hits={}", stats.cache_hits),
                    format!("cache_misses={}", stats.cache_misses),
                    format!("misses_not_found={}", stats.misses_not_found),
                    format!("misses_invalidated={}", stats.misses_invalidated),
                    format!("evictions={}", stats.evictions),
                    format!("invalidations={}", stats.invalidations),
                    format!("current_entries={}", stats.current_entries),
                    format!("current_memory_bytes={}", stats.current_memory_bytes),
                    format!("max_memory_bytes={}", stats.max_memory_bytes),
                    format!("total_hit_time_ms={:.3}", stats.total_hit_time_ms),
                    format!("total_miss_time_ms={:.3}", stats.total_miss_time_ms),
                    format!("total_saved_time_ms={:.3}", stats.total_saved_time_ms),
                ];
                ResponseFormatter::lines(&lines)
            }
            QueryType::CacheEnable => {
                if ctx.cache.enable() {
                    ResponseFormatter::ok()
                } else {
                    ResponseFormatter::error("Cache not configured")
                }
            }
            QueryType::CacheDisable => {
                ctx.cache.disable();
                ResponseFormatter::ok()
            }
            _ => ResponseFormatter::error("invalid query type for CacheHandler"),
        }
    }
}
