use std::path::Path;
use std::sync::atomic::Ordering;

use common::config::Config;
use common::query::{Query, QueryType};

use crate::handlers::HandlerContext;
use crate::response::ResponseFormatter;

/// INFO plus the CONFIG introspection subcommands.
pub struct AdminHandler;

impl AdminHandler {
    pub fn handle(ctx: &HandlerContext, query: &Query) -> String {
        match query.query_type {
            QueryType::Info => Self::handle_info(ctx),
            QueryType::ConfigHelp => Self::handle_config_help(query),
            QueryType::ConfigShow => Self::handle_config_show(ctx),
            QueryType::ConfigVerify => Self::handle_config_verify(query),
            _ => ResponseFormatter::error("invalid query type for AdminHandler"),
        }
    }

    fn handle_info(ctx: &HandlerContext) -> String {
        let mut lines = Vec::new();
        lines.push(format!("version={}", env!("CARGO_PKG_VERSION")));
        lines.push(format!("uptime_seconds={}", ctx.stats.uptime_seconds()));
        lines.push(format!("tables={}", ctx.catalog.len()));

        let mut total_documents = 0usize;
        let mut total_terms = 0usize;
        for name in ctx.catalog.table_names() {
            if let Some(table_ctx) = ctx.catalog.get(&name) {
                let state = table_ctx.read();
                let documents = state.docs.doc_count();
                let terms = state.index.term_count();
                total_documents += documents;
                total_terms += terms;
                lines.push(format!(
                    "table.{}.documents={} table.{}.terms={} table.{}.index_bytes={} table.{}.docstore_bytes={}",
                    name,
                    documents,
                    name,
                    terms,
                    name,
                    state.index.memory_usage(),
                    name,
                    state.docs.memory_usage()
                ));
            }
        }
        lines.push(format!("total_documents={}", total_documents));
        lines.push(format!("total_terms={}", total_terms));

        lines.push(format!(
            "connections_accepted={}",
            ctx.stats.connections_accepted.load(Ordering::Relaxed)
        ));
        lines.push(format!(
            "active_connections={}",
            ctx.stats.active_connections.load(Ordering::Relaxed)
        ));
        lines.push(format!("searches={}", ctx.stats.searches.load(Ordering::Relaxed)));
        lines.push(format!("counts={}", ctx.stats.counts.load(Ordering::Relaxed)));
        lines.push(format!("gets={}", ctx.stats.gets.load(Ordering::Relaxed)));
        lines.push(format!("queries_per_second={:.2}", ctx.stats.queries_per_second()));
        lines.push(format!(
            "applied_events={}",
            ctx.stats.applied_events.load(Ordering::Relaxed)
        ));

        lines.push(format!("applied_gtid={}", ctx.applied_gtid.lock().unwrap()));
        lines.push(format!("current_gtid={}", ctx.current_gtid.lock().unwrap()));
        lines.push(format!("read_only={}", ctx.catalog.is_read_only()));
        lines.push(format!("loading={}", ctx.catalog.is_loading()));

        ResponseFormatter::lines(&lines)
    }

    fn handle_config_help(query: &Query) -> String {
        let entries = Config::describe_schema(&query.path);
        if entries.is_empty() {
            return ResponseFormatter::error(format!("no configuration matches: {}", query.path));
        }
        let lines: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
        ResponseFormatter::lines(&lines)
    }

    fn handle_config_show(ctx: &HandlerContext) -> String {
        let rendered = ctx.config.to_masked_toml();
        let lines: Vec<String> = rendered.lines().map(|l| l.to_string()).collect();
        ResponseFormatter::lines(&lines)
    }

    fn handle_config_verify(query: &Query) -> String {
        match Config::load(Path::new(&query.path)) {
            Ok(config) => {
                let lines = vec![
                    format!("file={}", query.path),
                    format!("tables={}", config.tables.len()),
                    "valid=true".to_string(),
                ];
                ResponseFormatter::lines(&lines)
            }
            Err(e) => ResponseFormatter::error(format!("config invalid: {}", e)),
        }
    }
}
