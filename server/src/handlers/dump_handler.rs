use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Instant;

use tracing::{error, info};

use common::query::{Query, QueryType};
use common::time_util;
use index::NGramIndex;
use storage::doc_store::DocumentStore;
use storage::dump::v1::{get_dump_info, read_dump_v1, verify_dump_integrity, write_dump_v1};
use storage::dump::{DumpError, DumpStatistics, TableStatistics};

use crate::handlers::HandlerContext;
use crate::response::ResponseFormatter;

/// DUMP SAVE / LOAD / VERIFY / INFO.
pub struct DumpHandler;

impl DumpHandler {
    pub fn handle(ctx: &HandlerContext, query: &Query) -> String {
        match query.query_type {
            QueryType::DumpSave => Self::handle_save(ctx, query),
            QueryType::DumpLoad => Self::handle_load(ctx, query),
            QueryType::DumpVerify => Self::handle_verify(query),
            QueryType::DumpInfo => Self::handle_info(query),
            _ => ResponseFormatter::error("invalid query type for DumpHandler"),
        }
    }

    /// Writes a snapshot at the current applied GTID. The catalog is
    /// read-only for the duration so the apply worker cannot move the state
    /// while sections stream out.
    fn handle_save(ctx: &HandlerContext, query: &Query) -> String {
        if ctx.catalog.is_read_only() {
            return ResponseFormatter::error("Dump already in progress");
        }
        if ctx.catalog.is_loading() {
            return ResponseFormatter::error("Server is loading, please try again later");
        }

        let path = if query.path.is_empty() {
            ctx.config.server.dump_path.clone()
        } else {
            query.path.clone()
        };

        ctx.catalog.set_read_only(true);
        let started = Instant::now();
        let result = Self::write_snapshot(ctx, Path::new(&path), started);
        ctx.catalog.set_read_only(false);

        match result {
            Ok(gtid) => {
                info!(event = "dump", action = "save", path = %path, gtid = %gtid);
                ResponseFormatter::ok_value(&path)
            }
            Err(e) => {
                error!(event = "dump", action = "save_failed", path = %path, error = %e);
                ResponseFormatter::error(format!("dump save failed: {}", e))
            }
        }
    }

    fn write_snapshot(ctx: &HandlerContext, path: &Path, started: Instant) -> Result<String, DumpError> {
        let gtid = ctx.applied_gtid.lock().unwrap().to_string();

        // Read views over every table for the duration of the write.
        let names = ctx.catalog.table_names();
        let contexts: Vec<_> = names.iter().filter_map(|name| ctx.catalog.get(name)).collect();
        let guards: Vec<_> = contexts.iter().map(|table_ctx| table_ctx.read()).collect();

        let mut tables: BTreeMap<String, (&NGramIndex, &DocumentStore)> = BTreeMap::new();
        let mut table_stats: HashMap<String, TableStatistics> = HashMap::new();
        let mut stats = DumpStatistics::default();

        for (i, name) in names.iter().enumerate() {
            let state = &guards[i];
            tables.insert(name.clone(), (&state.index, &state.docs));

            let per_table = TableStatistics {
                document_count: state.docs.doc_count() as u64,
                term_count: state.index.term_count() as u64,
                index_bytes: state.index.memory_usage() as u64,
                docstore_bytes: state.docs.memory_usage() as u64,
                next_doc_id: state.docs.next_doc_id(),
                last_update_time: contexts[i].last_update_time(),
            };
            stats.total_documents += per_table.document_count;
            stats.total_terms += per_table.term_count;
            stats.total_index_bytes += per_table.index_bytes;
            stats.total_docstore_bytes += per_table.docstore_bytes;
            table_stats.insert(name.clone(), per_table);
        }
        stats.dump_time_ms = started.elapsed().as_millis() as u64;

        write_dump_v1(path, &gtid, &ctx.config, &tables, Some(&stats), Some(&table_stats))?;
        Ok(gtid)
    }

    /// Restores a dump into fresh index/doc-store pairs and swaps them in
    /// only after every section verified, so a corrupt dump never leaves a
    /// half-mutated catalog.
    fn handle_load(ctx: &HandlerContext, query: &Query) -> String {
        if ctx.catalog.is_loading() {
            return ResponseFormatter::error("Load already in progress");
        }
        if ctx.catalog.is_read_only() {
            return ResponseFormatter::error("Dump already in progress");
        }

        ctx.catalog.set_loading(true);
        let result = Self::load_snapshot(ctx, Path::new(&query.path));
        ctx.catalog.set_loading(false);

        match result {
            Ok(gtid) => {
                info!(event = "dump", action = "load", path = %query.path, gtid = %gtid);
                ResponseFormatter::ok_value(&gtid)
            }
            Err(e) => {
                error!(event = "dump", action = "load_failed", path = %query.path, error = %e);
                ResponseFormatter::error(format!("dump load failed: {}", e))
            }
        }
    }

    fn load_snapshot(ctx: &HandlerContext, path: &Path) -> Result<String, DumpError> {
        // Fresh, pre-allocated targets per configured table.
        let names = ctx.catalog.table_names();
        let mut fresh: Vec<(String, NGramIndex, DocumentStore)> = names
            .iter()
            .filter_map(|name| ctx.catalog.get(name))
            .map(|table_ctx| {
                (
                    table_ctx.config.name.clone(),
                    NGramIndex::new(table_ctx.config.ngram_size, table_ctx.config.kanji_ngram_size),
                    DocumentStore::new(),
                )
            })
            .collect();

        let payload = {
            let mut targets: HashMap<String, (&mut NGramIndex, &mut DocumentStore)> = HashMap::new();
            for (name, table_index, docs) in fresh.iter_mut() {
                targets.insert(name.clone(), (table_index, docs));
            }
            read_dump_v1(path, &mut targets)?
        };

        // Everything verified; swap the catalog state and the replication
        // position together.
        for (name, table_index, docs) in fresh {
            if let Some(table_ctx) = ctx.catalog.get(&name) {
                table_ctx.replace_state(table_index, docs);
                table_ctx.touch(time_util::epoch_seconds());
            }
        }
        match binlog::gtid::GtidSet::parse(&payload.gtid) {
            Ok(set) => *ctx.applied_gtid.lock().unwrap() = set,
            Err(e) => {
                error!(event = "dump", action = "load", error = %e, "dump GTID does not parse, keeping previous cursor");
            }
        }
        // Every cached result predates the restored state.
        ctx.cache.clear();

        Ok(payload.gtid)
    }

    fn handle_verify(query: &Query) -> String {
        match verify_dump_integrity(Path::new(&query.path)) {
            Ok(()) => ResponseFormatter::ok(),
            Err(e) => ResponseFormatter::error(format!("dump verify failed: {}", e)),
        }
    }

    fn handle_info(query: &Query) -> String {
        match get_dump_info(Path::new(&query.path)) {
            Ok(info) => {
                let lines = vec![
                    format!("version={}", info.version),
                    format!("gtid={}", info.gtid),
                    format!("table_count={}", info.table_count),
                    format!("flags={:#010x}", info.flags),
                    format!("file_size={}", info.file_size),
                    format!("timestamp={}", info.timestamp),
                    format!("has_statistics={}", info.has_statistics),
                ];
                ResponseFormatter::lines(&lines)
            }
            Err(e) => ResponseFormatter::error(format!("dump info failed: {}", e)),
        }
    }
}
