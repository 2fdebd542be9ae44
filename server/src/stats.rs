use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use common::query::QueryType;

/// Lock-free server counters. One instance per server, shared by every
/// connection thread and the replication pipeline.
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    pub connections_accepted: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub active_connections: AtomicU64,
    pub searches: AtomicU64,
    pub counts: AtomicU64,
    pub gets: AtomicU64,
    pub infos: AtomicU64,
    pub config_commands: AtomicU64,
    pub dump_commands: AtomicU64,
    pub cache_commands: AtomicU64,
    pub debug_commands: AtomicU64,
    pub parse_errors: AtomicU64,
    pub applied_events: AtomicU64,
}

impl Default for ServerStats {
    fn default() -> Self {
        ServerStats::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        ServerStats {
            started_at: Instant::now(),
            connections_accepted: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            searches: AtomicU64::new(0),
            counts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            infos: AtomicU64::new(0),
            config_commands: AtomicU64::new(0),
            dump_commands: AtomicU64::new(0),
            cache_commands: AtomicU64::new(0),
            debug_commands: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            applied_events: AtomicU64::new(0),
        }
    }

    pub fn increment_command(&self, query_type: QueryType) {
        let counter = match query_type {
            QueryType::Search => &self.searches,
            QueryType::Count => &self.counts,
            QueryType::Get => &self.gets,
            QueryType::Info => &self.infos,
            QueryType::ConfigHelp | QueryType::ConfigShow | QueryType::ConfigVerify => &self.config_commands,
            QueryType::DumpSave | QueryType::DumpLoad | QueryType::DumpVerify | QueryType::DumpInfo => {
                &self.dump_commands
            }
            QueryType::CacheClear | QueryType::CacheStats | QueryType::CacheEnable | QueryType::CacheDisable => {
                &self.cache_commands
            }
            QueryType::DebugOn | QueryType::DebugOff => &self.debug_commands,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn total_queries(&self) -> u64 {
        self.searches.load(Ordering::Relaxed) + self.counts.load(Ordering::Relaxed) + self.gets.load(Ordering::Relaxed)
    }

    /// Average query rate since start.
    pub fn queries_per_second(&self) -> f64 {
        let uptime = self.started_at.elapsed().as_secs_f64();
        if uptime <= 0.0 {
            return 0.0;
        }
        self.total_queries() as f64 / uptime
    }
}
