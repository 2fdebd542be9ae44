use tracing::debug;

use common::query::QueryType;

use crate::handlers::admin_handler::AdminHandler;
use crate::handlers::cache_handler::CacheHandler;
use crate::handlers::document_handler::DocumentHandler;
use crate::handlers::dump_handler::DumpHandler;
use crate::handlers::search_handler::SearchHandler;
use crate::handlers::{ConnectionContext, HandlerContext};
use crate::query::QueryParser;
use crate::response::ResponseFormatter;

/// Parses request lines and routes them to the handlers.
///
/// Validation order: request length (enforced by the parser), grammar,
/// table existence, then the default LIMIT for SEARCH.
pub struct RequestDispatcher {
    ctx: HandlerContext,
}

impl RequestDispatcher {
    pub fn new(ctx: HandlerContext) -> Self {
        RequestDispatcher { ctx }
    }

    pub fn ctx(&self) -> &HandlerContext {
        &self.ctx
    }

    pub fn dispatch(&self, request: &str, conn: &mut ConnectionContext) -> String {
        debug!(event = "dispatch", request = %request);

        // A fresh parser per request: no shared parser state across threads.
        let parser = QueryParser::new(self.ctx.config.server.max_query_length);
        let mut query = match parser.parse(request) {
            Ok(query) => query,
            Err(e) => {
                self.ctx.stats.parse_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return ResponseFormatter::error(e.to_string());
            }
        };

        // Default LIMIT when the client did not give one.
        if !query.limit_explicit && query.query_type == QueryType::Search {
            query.limit = self.ctx.config.server.default_limit;
        }

        self.ctx.stats.increment_command(query.query_type);

        // Table validation for the commands that name one.
        if !query.table.is_empty() && !self.ctx.catalog.exists(&query.table) {
            return ResponseFormatter::error(format!("Table not found: {}", query.table));
        }

        match query.query_type {
            QueryType::Search | QueryType::Count => SearchHandler::handle(&self.ctx, &query, conn),
            QueryType::Get => DocumentHandler::handle(&self.ctx, &query),
            QueryType::Info
            | QueryType::ConfigHelp
            | QueryType::ConfigShow
            | QueryType::ConfigVerify => AdminHandler::handle(&self.ctx, &query),
            QueryType::DumpSave | QueryType::DumpLoad | QueryType::DumpVerify | QueryType::DumpInfo => {
                DumpHandler::handle(&self.ctx, &query)
            }
            QueryType::CacheClear | QueryType::CacheStats | QueryType::CacheEnable | QueryType::CacheDisable => {
                CacheHandler::handle(&self.ctx, &query)
            }
            QueryType::DebugOn => {
                conn.debug_mode = true;
                ResponseFormatter::ok()
            }
            QueryType::DebugOff => {
                conn.debug_mode = false;
                ResponseFormatter::ok()
            }
        }
    }
}
