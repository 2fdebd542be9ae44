use common::query::Query;

use crate::handlers::{HandlerContext, SERVER_LOADING};
use crate::response::ResponseFormatter;

/// GET <table> <primary_key>: the stored document with its bound filter
/// columns.
pub struct DocumentHandler;

impl DocumentHandler {
    pub fn handle(ctx: &HandlerContext, query: &Query) -> String {
        if ctx.catalog.is_loading() {
            return ResponseFormatter::error(SERVER_LOADING);
        }
        let Some(table_ctx) = ctx.catalog.get(&query.table) else {
            return ResponseFormatter::error(format!("Table not found: {}", query.table));
        };

        let state = table_ctx.read();
        let Some(doc) = state.docs.get_by_primary_key(&query.primary_key) else {
            return ResponseFormatter::error(format!("Document not found: {}", query.primary_key));
        };

        let mut lines = Vec::with_capacity(2 + doc.filters.len());
        lines.push(format!("primary_key={}", doc.primary_key));
        lines.push(format!("doc_id={}", doc.doc_id));
        for (name, value) in &doc.filters {
            lines.push(format!("{}={}", name, value));
        }
        ResponseFormatter::lines(&lines)
    }
}
