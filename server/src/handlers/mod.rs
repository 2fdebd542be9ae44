pub mod admin_handler;
pub mod cache_handler;
pub mod document_handler;
pub mod dump_handler;
pub mod search_handler;

use std::sync::{Arc, Mutex};

use binlog::gtid::GtidSet;
use cache::CacheManager;
use common::config::Config;

use crate::catalog::TableCatalog;
use crate::stats::ServerStats;

/// Everything the handlers share; one instance per server, cheap to clone
/// into connection threads.
#[derive(Clone)]
pub struct HandlerContext {
    pub config: Arc<Config>,
    pub catalog: Arc<TableCatalog>,
    pub cache: Arc<CacheManager>,
    pub stats: Arc<ServerStats>,
    /// GTID set the apply worker has committed to the catalog.
    pub applied_gtid: Arc<Mutex<GtidSet>>,
    /// GTID last seen by the fetch loop; ahead of applied while the queue
    /// drains.
    pub current_gtid: Arc<Mutex<String>>,
}

impl HandlerContext {
    pub fn new(config: Config, catalog: TableCatalog, cache: CacheManager) -> Self {
        HandlerContext {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            cache: Arc::new(cache),
            stats: Arc::new(ServerStats::new()),
            applied_gtid: Arc::new(Mutex::new(GtidSet::new())),
            current_gtid: Arc::new(Mutex::new(String::new())),
        }
    }
}

/// Per-connection state.
#[derive(Debug, Default)]
pub struct ConnectionContext {
    pub debug_mode: bool,
}

/// Message of the loading-only state, shared by every query path.
pub const SERVER_LOADING: &str = "Server is loading, please try again later";
