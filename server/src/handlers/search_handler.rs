use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Instant;

use binlog::filter::FilterEvaluator;
use common::query::{OrderByClause, Query, QueryType, SortOrder};
use common::value::{DocId, FilterValue};

use crate::catalog::TableState;
use crate::handlers::{ConnectionContext, HandlerContext, SERVER_LOADING};
use crate::query::{CacheStatus, DebugInfo};
use crate::response::ResponseFormatter;

/// OFFSETs beyond this fall back to fetch-all-then-sort.
const MAX_OFFSET_FOR_OPTIMIZATION: u32 = 10_000;

/// Use top-k only when the requested window covers less than this share of
/// the estimated result set.
const TOP_K_WINDOW_THRESHOLD: f64 = 0.5;

/// SEARCH and COUNT: n-gram lookup, intersection, NOT subtraction, filter
/// conditions, then sorting and pagination (SEARCH only). Consults the
/// query cache before executing and stores the full pre-pagination result
/// back with its cost.
pub struct SearchHandler;

struct TermInfo {
    ngrams: Vec<String>,
    estimated_size: usize,
}

impl SearchHandler {
    pub fn handle(ctx: &HandlerContext, query: &Query, conn: &ConnectionContext) -> String {
        match query.query_type {
            QueryType::Search => Self::handle_search(ctx, query, conn),
            QueryType::Count => Self::handle_count(ctx, query, conn),
            _ => ResponseFormatter::error("invalid query type for SearchHandler"),
        }
    }

    fn handle_search(ctx: &HandlerContext, query: &Query, conn: &ConnectionContext) -> String {
        if ctx.catalog.is_loading() {
            return ResponseFormatter::error(SERVER_LOADING);
        }

        let Some(table_ctx) = ctx.catalog.get(&query.table) else {
            return ResponseFormatter::error(format!("Table not found: {}", query.table));
        };
        let pk_column = table_ctx.config.primary_key.clone();

        // Cache first: the stored result is pre-pagination, so any window
        // can be served from it.
        let cache_lookup_start = Instant::now();
        if let Some(hit) = ctx.cache.lookup(query) {
            let state = table_ctx.read();
            let total = hit.doc_ids.len();
            let page = sort_and_paginate(hit.doc_ids, &state, query, &pk_column);
            let primary_keys = to_primary_keys(&page, &state);

            let debug = conn.debug_mode.then(|| {
                let mut debug = DebugInfo {
                    query_time_ms: cache_lookup_start.elapsed().as_secs_f64() * 1000.0,
                    final_results: primary_keys.len(),
                    cache_status: CacheStatus::Hit,
                    cache_age_ms: hit.created_at.elapsed().as_secs_f64() * 1000.0,
                    cache_saved_ms: hit.query_cost_ms,
                    ..Default::default()
                };
                debug.limit_applied = query.limit;
                debug.offset_applied = query.offset;
                debug
            });
            return ResponseFormatter::search(total, &primary_keys, debug.as_ref());
        }

        let start = Instant::now();
        let mut debug = DebugInfo::default();
        let state = table_ctx.read();

        let Some(mut term_infos) = collect_terms(query, &state, &mut debug, conn.debug_mode) else {
            // A term with an empty posting list: nothing can match.
            debug.optimization_used = "early-exit (empty posting list)".to_string();
            debug.query_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            debug.index_time_ms = debug.query_time_ms;
            let debug = conn.debug_mode.then_some(&debug);
            return ResponseFormatter::search(0, &[], debug);
        };

        // Most selective term first keeps intersections small.
        term_infos.sort_by_key(|t| t.estimated_size);

        let order_by = effective_order(query);
        let is_pk_order = order_by.is_primary_key() || order_by.column == pk_column;

        let can_optimize = term_infos.len() == 1
            && query.not_terms.is_empty()
            && query.filters.is_empty()
            && query.limit > 0
            && query.offset <= MAX_OFFSET_FOR_OPTIMIZATION
            && is_pk_order;

        let index_start = Instant::now();
        let mut total_known = None;
        let mut results: Vec<DocId>;

        if can_optimize {
            let all = state.index.search_and(&term_infos[0].ngrams);
            let total = all.len();
            total_known = Some(total);

            let window = (query.offset + query.limit) as usize;
            let covers_most = total == 0 || (window as f64 / total as f64) > TOP_K_WINDOW_THRESHOLD;
            if covers_most {
                results = all;
                debug.optimization_used = "reuse-fetch (small result set)".to_string();
            } else {
                let reverse = order_by.order == SortOrder::Desc;
                results = state.index.search_and_top_k(&term_infos[0].ngrams, window, reverse);
                debug.optimization_used = format!(
                    "index top-k (single term + {} + limit)",
                    if reverse { "DESC" } else { "ASC" }
                );
                // A top-k slice is already in final order; paginate directly.
                let page: Vec<DocId> = results.iter().skip(query.offset as usize).copied().collect();
                let primary_keys = to_primary_keys(&page, &state);
                debug.total_candidates = total;
                debug.after_intersection = total;
                debug.after_not = total;
                debug.after_filters = total;
                debug.final_results = primary_keys.len();
                debug.index_time_ms = index_start.elapsed().as_secs_f64() * 1000.0;
                debug.query_time_ms = start.elapsed().as_secs_f64() * 1000.0;
                fill_common_debug(&mut debug, query, &order_by, &pk_column, ctx);
                let debug = conn.debug_mode.then_some(&debug);
                return ResponseFormatter::search(total, &primary_keys, debug);
            }
        } else {
            results = state.index.search_and(&term_infos[0].ngrams);
            debug.optimization_used = "size-based term ordering".to_string();
        }
        debug.total_candidates = results.len();

        // Remaining AND terms.
        for term in &term_infos[1..] {
            if results.is_empty() {
                break;
            }
            let other = state.index.search_and(&term.ngrams);
            results = index::posting_list::intersect_sorted(&results, &other);
        }
        debug.after_intersection = results.len();

        // NOT terms subtract their full match set.
        for term in &query.not_terms {
            if results.is_empty() {
                break;
            }
            let grams = state.index.grams(term);
            results = state.index.subtract(&results, &grams);
        }
        debug.after_not = results.len();

        // FILTER conditions against the bound filter columns.
        let filter_start = Instant::now();
        if !query.filters.is_empty() {
            results = apply_filters(results, &state, query);
            debug.filter_time_ms = filter_start.elapsed().as_secs_f64() * 1000.0;
        }
        debug.after_filters = results.len();

        let total = total_known.unwrap_or(results.len());
        let query_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        // Full pre-pagination result goes to the cache with its cost.
        if ctx.cache.is_enabled() {
            let ngrams: BTreeSet<String> = term_infos.iter().flat_map(|t| t.ngrams.iter().cloned()).collect();
            ctx.cache.insert(query, &results, ngrams, query_time_ms);
            debug.cache_status = CacheStatus::MissNotFound;
        } else {
            debug.cache_status = CacheStatus::MissDisabled;
        }

        let page = sort_and_paginate(results, &state, query, &pk_column);
        let primary_keys = to_primary_keys(&page, &state);

        debug.final_results = primary_keys.len();
        debug.index_time_ms = index_start.elapsed().as_secs_f64() * 1000.0;
        debug.query_time_ms = query_time_ms;
        fill_common_debug(&mut debug, query, &order_by, &pk_column, ctx);

        let debug = conn.debug_mode.then_some(&debug);
        ResponseFormatter::search(total, &primary_keys, debug)
    }

    fn handle_count(ctx: &HandlerContext, query: &Query, conn: &ConnectionContext) -> String {
        if ctx.catalog.is_loading() {
            return ResponseFormatter::error(SERVER_LOADING);
        }

        let Some(table_ctx) = ctx.catalog.get(&query.table) else {
            return ResponseFormatter::error(format!("Table not found: {}", query.table));
        };

        let cache_lookup_start = Instant::now();
        if let Some(hit) = ctx.cache.lookup(query) {
            let debug = conn.debug_mode.then(|| DebugInfo {
                query_time_ms: cache_lookup_start.elapsed().as_secs_f64() * 1000.0,
                final_results: hit.doc_ids.len(),
                cache_status: CacheStatus::Hit,
                cache_age_ms: hit.created_at.elapsed().as_secs_f64() * 1000.0,
                cache_saved_ms: hit.query_cost_ms,
                ..Default::default()
            });
            return ResponseFormatter::count(hit.doc_ids.len(), debug.as_ref());
        }

        let start = Instant::now();
        let mut debug = DebugInfo::default();
        let state = table_ctx.read();

        let Some(mut term_infos) = collect_terms(query, &state, &mut debug, conn.debug_mode) else {
            debug.query_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            let debug = conn.debug_mode.then_some(&debug);
            return ResponseFormatter::count(0, debug);
        };
        term_infos.sort_by_key(|t| t.estimated_size);

        let mut results = state.index.search_and(&term_infos[0].ngrams);
        debug.total_candidates = results.len();
        for term in &term_infos[1..] {
            if results.is_empty() {
                break;
            }
            let other = state.index.search_and(&term.ngrams);
            results = index::posting_list::intersect_sorted(&results, &other);
        }
        debug.after_intersection = results.len();

        for term in &query.not_terms {
            if results.is_empty() {
                break;
            }
            let grams = state.index.grams(term);
            results = state.index.subtract(&results, &grams);
        }
        debug.after_not = results.len();

        if !query.filters.is_empty() {
            results = apply_filters(results, &state, query);
        }
        debug.after_filters = results.len();

        let query_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        if ctx.cache.is_enabled() {
            let ngrams: BTreeSet<String> = term_infos.iter().flat_map(|t| t.ngrams.iter().cloned()).collect();
            ctx.cache.insert(query, &results, ngrams, query_time_ms);
            debug.cache_status = CacheStatus::MissNotFound;
        } else {
            debug.cache_status = CacheStatus::MissDisabled;
        }

        debug.query_time_ms = query_time_ms;
        debug.final_results = results.len();
        let debug = conn.debug_mode.then_some(&debug);
        ResponseFormatter::count(results.len(), debug)
    }
}

/// N-grams + selectivity estimate per search term. `None` when a term can
/// match nothing (empty posting list short-circuit).
fn collect_terms(query: &Query, state: &TableState, debug: &mut DebugInfo, debug_mode: bool) -> Option<Vec<TermInfo>> {
    let mut terms: Vec<&String> = Vec::with_capacity(1 + query.and_terms.len());
    terms.push(&query.search_text);
    terms.extend(query.and_terms.iter());

    if debug_mode {
        debug.search_terms = terms.iter().map(|t| t.to_string()).collect();
    }

    let mut infos = Vec::with_capacity(terms.len());
    for term in terms {
        let ngrams = state.index.grams(term);
        if ngrams.is_empty() {
            return None;
        }
        // The smallest posting list bounds the term's result size.
        let mut estimated = usize::MAX;
        for gram in &ngrams {
            match state.index.get_posting_list(gram) {
                Some(list) => estimated = estimated.min(list.size()),
                None => {
                    estimated = 0;
                    break;
                }
            }
        }
        if estimated == 0 {
            return None;
        }
        infos.push(TermInfo {
            ngrams,
            estimated_size: estimated,
        });
    }
    Some(infos)
}

fn effective_order(query: &Query) -> OrderByClause {
    query.order_by.clone().unwrap_or(OrderByClause {
        column: String::new(),
        order: SortOrder::Desc,
    })
}

fn fill_common_debug(debug: &mut DebugInfo, query: &Query, order_by: &OrderByClause, pk_column: &str, _ctx: &HandlerContext) {
    let column = if order_by.column.is_empty() { pk_column } else { &order_by.column };
    let direction = match order_by.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    debug.order_by_applied = format!("{} {}{}", column, direction, if query.order_by.is_none() { " (default)" } else { "" });
    debug.limit_applied = query.limit;
    debug.offset_applied = query.offset;
}

/// Keeps documents whose bound filter values satisfy every FILTER clause.
/// A document missing the column is excluded.
fn apply_filters(results: Vec<DocId>, state: &TableState, query: &Query) -> Vec<DocId> {
    results
        .into_iter()
        .filter(|doc_id| {
            let Some(doc) = state.docs.get(*doc_id) else {
                return false;
            };
            query.filters.iter().all(|condition| {
                doc.filters
                    .get(&condition.column)
                    .map(|value| {
                        FilterEvaluator::compare(value, &condition.op.to_string(), &condition.value, &condition.column)
                    })
                    .unwrap_or(false)
            })
        })
        .collect()
}

/// Sorts by the requested column (primary key by default, numeric-aware)
/// and applies OFFSET/LIMIT. LIMIT 0 means unbounded.
fn sort_and_paginate(mut doc_ids: Vec<DocId>, state: &TableState, query: &Query, pk_column: &str) -> Vec<DocId> {
    let order_by = effective_order(query);
    let by_pk = order_by.is_primary_key() || order_by.column == pk_column;

    if by_pk {
        doc_ids.sort_by(|a, b| {
            let pk_a = state.docs.get(*a).map(|d| d.primary_key.as_str()).unwrap_or("");
            let pk_b = state.docs.get(*b).map(|d| d.primary_key.as_str()).unwrap_or("");
            compare_keys(pk_a, pk_b)
        });
    } else {
        doc_ids.sort_by(|a, b| {
            let value_a = state.docs.get(*a).and_then(|d| d.filters.get(&order_by.column));
            let value_b = state.docs.get(*b).and_then(|d| d.filters.get(&order_by.column));
            compare_filter_values(value_a, value_b)
        });
    }
    if order_by.order == SortOrder::Desc {
        doc_ids.reverse();
    }

    let offset = query.offset as usize;
    if offset >= doc_ids.len() {
        return Vec::new();
    }
    let mut page: Vec<DocId> = doc_ids.split_off(offset);
    if query.limit > 0 && page.len() > query.limit as usize {
        page.truncate(query.limit as usize);
    }
    page
}

/// Numeric comparison when both keys parse as integers, byte order
/// otherwise.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i128>(), b.parse::<i128>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Same-type ordering; values of different types group by type tag, and
/// missing values sort first.
fn compare_filter_values(a: Option<&FilterValue>, b: Option<&FilterValue>) -> Ordering {
    fn rank(value: &FilterValue) -> u8 {
        match value {
            FilterValue::Null => 0,
            FilterValue::Bool(_) => 1,
            FilterValue::Int(_) => 2,
            FilterValue::UInt(_) => 3,
            FilterValue::Double(_) => 4,
            FilterValue::Str(_) => 5,
            FilterValue::Time(_) => 6,
            FilterValue::Epoch(_) => 7,
        }
    }
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (FilterValue::Bool(x), FilterValue::Bool(y)) => x.cmp(y),
            (FilterValue::Int(x), FilterValue::Int(y)) => x.cmp(y),
            (FilterValue::UInt(x), FilterValue::UInt(y)) => x.cmp(y),
            (FilterValue::Double(x), FilterValue::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (FilterValue::Str(x), FilterValue::Str(y)) => x.cmp(y),
            (FilterValue::Time(x), FilterValue::Time(y)) => x.cmp(y),
            (FilterValue::Epoch(x), FilterValue::Epoch(y)) => x.cmp(y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

fn to_primary_keys(doc_ids: &[DocId], state: &TableState) -> Vec<String> {
    doc_ids
        .iter()
        .filter_map(|doc_id| state.docs.get(*doc_id).map(|d| d.primary_key.clone()))
        .collect()
}
