use serde::Serialize;

use common::value::FilterMap;

/// A decoded, filter-extracted change ready for the apply queue.
///
/// Every variant carries the GTID of the enclosing transaction; the fetch
/// loop stamps it from its current-GTID cursor at enqueue time.
#[derive(Debug, Clone, Serialize)]
pub enum BinlogEvent {
    Insert {
        table: String,
        primary_key: String,
        text: String,
        filters: FilterMap,
        gtid: String,
    },
    Update {
        table: String,
        primary_key: String,
        new_text: String,
        old_text: String,
        filters: FilterMap,
        gtid: String,
    },
    Delete {
        table: String,
        primary_key: String,
        text: String,
        filters: FilterMap,
        gtid: String,
    },
    Ddl {
        table: String,
        sql_upper: String,
        gtid: String,
    },
}

impl BinlogEvent {
    pub fn table(&self) -> &str {
        match self {
            BinlogEvent::Insert { table, .. }
            | BinlogEvent::Update { table, .. }
            | BinlogEvent::Delete { table, .. }
            | BinlogEvent::Ddl { table, .. } => table,
        }
    }

    pub fn gtid(&self) -> &str {
        match self {
            BinlogEvent::Insert { gtid, .. }
            | BinlogEvent::Update { gtid, .. }
            | BinlogEvent::Delete { gtid, .. }
            | BinlogEvent::Ddl { gtid, .. } => gtid,
        }
    }

    pub fn set_gtid(&mut self, value: &str) {
        match self {
            BinlogEvent::Insert { gtid, .. }
            | BinlogEvent::Update { gtid, .. }
            | BinlogEvent::Delete { gtid, .. }
            | BinlogEvent::Ddl { gtid, .. } => *gtid = value.to_string(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            BinlogEvent::Insert { .. } => "INSERT",
            BinlogEvent::Update { .. } => "UPDATE",
            BinlogEvent::Delete { .. } => "DELETE",
            BinlogEvent::Ddl { .. } => "DDL",
        }
    }
}
