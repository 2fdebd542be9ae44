use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// Parsed client request. Produced by the server's line parser, consumed by
/// the handlers and the query cache canonicaliser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueryType {
    Search,
    Count,
    Get,
    Info,
    ConfigHelp,
    ConfigShow,
    ConfigVerify,
    DumpSave,
    DumpLoad,
    DumpVerify,
    DumpInfo,
    CacheClear,
    CacheStats,
    CacheEnable,
    CacheDisable,
    DebugOn,
    DebugOff,
}

impl QueryType {
    pub fn command_name(&self) -> &'static str {
        match self {
            QueryType::Search => "SEARCH",
            QueryType::Count => "COUNT",
            QueryType::Get => "GET",
            QueryType::Info => "INFO",
            QueryType::ConfigHelp | QueryType::ConfigShow | QueryType::ConfigVerify => "CONFIG",
            QueryType::DumpSave | QueryType::DumpLoad | QueryType::DumpVerify | QueryType::DumpInfo => "DUMP",
            QueryType::CacheClear | QueryType::CacheStats | QueryType::CacheEnable | QueryType::CacheDisable => {
                "CACHE"
            }
            QueryType::DebugOn | QueryType::DebugOff => "DEBUG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn parse(token: &str) -> Option<FilterOp> {
        match token {
            "=" => Some(FilterOp::Eq),
            "!=" => Some(FilterOp::Ne),
            ">" => Some(FilterOp::Gt),
            ">=" => Some(FilterOp::Gte),
            "<" => Some(FilterOp::Lt),
            "<=" => Some(FilterOp::Lte),
            _ => None,
        }
    }
}

impl Display for FilterOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterCondition {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderByClause {
    /// Empty column means the table's primary key.
    pub column: String,
    pub order: SortOrder,
}

impl OrderByClause {
    pub fn is_primary_key(&self) -> bool {
        self.column.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Query {
    pub query_type: QueryType,
    pub table: String,
    pub search_text: String,
    pub and_terms: Vec<String>,
    pub not_terms: Vec<String>,
    pub filters: Vec<FilterCondition>,
    pub order_by: Option<OrderByClause>,
    pub limit: u32,
    pub limit_explicit: bool,
    pub offset: u32,
    pub offset_explicit: bool,
    /// Primary key operand of GET.
    pub primary_key: String,
    /// File path operand of DUMP SAVE/LOAD/VERIFY/INFO and CONFIG VERIFY,
    /// or the optional path argument of CONFIG HELP/SHOW.
    pub path: String,
}

impl Query {
    pub fn new(query_type: QueryType) -> Self {
        Query {
            query_type,
            table: String::new(),
            search_text: String::new(),
            and_terms: Vec::new(),
            not_terms: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: 0,
            limit_explicit: false,
            offset: 0,
            offset_explicit: false,
            primary_key: String::new(),
            path: String::new(),
        }
    }

    /// SEARCH and COUNT are the only cacheable query types.
    pub fn is_cacheable(&self) -> bool {
        matches!(self.query_type, QueryType::Search | QueryType::Count)
    }
}
