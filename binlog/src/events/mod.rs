pub mod binlog_event;
pub mod event_header;
pub mod event_type;
pub mod gtid_event;
pub mod query_event;
pub mod rows_event;
pub mod table_map_event;

pub use binlog_event::BinlogEvent;
pub use event_header::EventHeader;
pub use event_type::EventType;
