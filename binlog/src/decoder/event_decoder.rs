use std::collections::HashMap;

use chrono::FixedOffset;
use tracing::{debug, warn};

use common::config::TableConfig;
use common::err::{CResult, Error};

use crate::events::rows_event::{self, RowImage, RowsEvent};
use crate::events::{gtid_event, query_event, table_map_event, BinlogEvent, EventHeader, EventType};
use crate::filter::FilterEvaluator;
use crate::metadata::{TableMetadata, TableMetadataCache};

/// What a framed upstream buffer decoded into.
#[derive(Debug)]
pub enum DecodedEvent {
    /// New current-GTID cursor value for the fetch loop.
    Gtid(String),
    /// Schema update the fetch loop feeds into its metadata cache.
    TableMap(TableMetadata),
    /// Row changes or DDL, ready for the required-filter gate and the queue.
    /// The GTID field of each event is still empty at this point.
    Events(Vec<BinlogEvent>),
    /// XID: transaction boundary, nothing to apply.
    Commit,
    /// Event type the pipeline does not react to.
    Ignored,
}

/// Turns framed upstream event buffers into typed events.
///
/// Owns no connection state; the fetch loop feeds it buffers and routes the
/// outcomes (cursor updates, metadata, queue entries) itself.
pub struct EventDecoder {
    tables: HashMap<String, TableConfig>,
    evaluator: FilterEvaluator,
}

impl EventDecoder {
    pub fn new(tables: Vec<TableConfig>, zone: FixedOffset) -> Self {
        EventDecoder {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
            evaluator: FilterEvaluator::new(zone),
        }
    }

    pub fn evaluator(&self) -> &FilterEvaluator {
        &self.evaluator
    }

    pub fn table_config(&self, table: &str) -> Option<&TableConfig> {
        self.tables.get(table)
    }

    /// Decodes one framed buffer. The first byte is the wire status byte and
    /// is discarded; the embedded event size defines the parseable region.
    pub fn decode(&self, frame: &[u8], metadata_cache: &TableMetadataCache) -> CResult<DecodedEvent> {
        if frame.len() < 21 {
            return Err(Error::Corrupt(format!("frame of {} bytes is too short", frame.len())));
        }
        let event = &frame[1..];
        let header = EventHeader::parse(event)?;

        let Ok(event_type) = EventType::try_from(header.event_type) else {
            return Ok(DecodedEvent::Ignored);
        };
        debug!(event = "binlog_debug", action = "decode", event_type = ?event_type, size = header.event_size);

        match event_type {
            EventType::Gtid => Ok(DecodedEvent::Gtid(gtid_event::extract_gtid(event)?)),
            EventType::TableMap => Ok(DecodedEvent::TableMap(table_map_event::parse(event)?)),
            EventType::WriteRows | EventType::UpdateRows | EventType::DeleteRows => {
                self.decode_rows(event, event_type, metadata_cache)
            }
            EventType::Query => self.decode_query(event),
            EventType::Xid => Ok(DecodedEvent::Commit),
            _ => Ok(DecodedEvent::Ignored),
        }
    }

    fn decode_rows(
        &self,
        event: &[u8],
        event_type: EventType,
        metadata_cache: &TableMetadataCache,
    ) -> CResult<DecodedEvent> {
        let table_id = rows_event::peek_table_id(event)?;
        let Some(metadata) = metadata_cache.get(table_id) else {
            warn!(
                event = "mysql_binlog_warning",
                table_id,
                event_type = ?event_type,
                "rows event for unknown table_id, skipping"
            );
            return Ok(DecodedEvent::Ignored);
        };
        // Rows for tables outside the configuration are not an error.
        let Some(table_config) = self.tables.get(&metadata.table_name) else {
            return Ok(DecodedEvent::Ignored);
        };

        let rows = rows_event::parse(event, event_type, metadata)?;
        let mut events = Vec::with_capacity(rows.row_count());
        match rows {
            RowsEvent::Write(images) => {
                for image in images {
                    events.push(BinlogEvent::Insert {
                        table: metadata.table_name.clone(),
                        primary_key: self.primary_key(&image, table_config),
                        text: self.text(&image, table_config),
                        filters: self.evaluator.extract_all(&image, table_config),
                        gtid: String::new(),
                    });
                }
            }
            RowsEvent::Delete(images) => {
                for image in images {
                    events.push(BinlogEvent::Delete {
                        table: metadata.table_name.clone(),
                        primary_key: self.primary_key(&image, table_config),
                        text: self.text(&image, table_config),
                        filters: self.evaluator.extract_all(&image, table_config),
                        gtid: String::new(),
                    });
                }
            }
            RowsEvent::Update(pairs) => {
                for (before, after) in pairs {
                    events.push(BinlogEvent::Update {
                        table: metadata.table_name.clone(),
                        primary_key: self.primary_key(&after, table_config),
                        new_text: self.text(&after, table_config),
                        old_text: self.text(&before, table_config),
                        // Filters come from the after-image.
                        filters: self.evaluator.extract_all(&after, table_config),
                        gtid: String::new(),
                    });
                }
            }
        }
        Ok(DecodedEvent::Events(events))
    }

    fn decode_query(&self, event: &[u8]) -> CResult<DecodedEvent> {
        let query = query_event::extract_query(event)?;
        let mut events = Vec::new();
        for (table_name, _) in self.tables.iter() {
            if let Some((_, sql_upper)) = query_event::classify_ddl(&query, table_name) {
                events.push(BinlogEvent::Ddl {
                    table: table_name.clone(),
                    sql_upper,
                    gtid: String::new(),
                });
            }
        }
        if events.is_empty() {
            Ok(DecodedEvent::Ignored)
        } else {
            Ok(DecodedEvent::Events(events))
        }
    }

    fn primary_key(&self, image: &RowImage, table_config: &TableConfig) -> String {
        image
            .get(&table_config.primary_key)
            .and_then(|v| v.clone())
            .unwrap_or_default()
    }

    /// Indexed text: the configured single column, or the concat columns
    /// joined by the delimiter. NULL columns contribute an empty string.
    fn text(&self, image: &RowImage, table_config: &TableConfig) -> String {
        let source = &table_config.text_source;
        if !source.column.is_empty() {
            return image.get(&source.column).and_then(|v| v.clone()).unwrap_or_default();
        }
        source
            .concat
            .iter()
            .map(|column| image.get(column).and_then(|v| v.clone()).unwrap_or_default())
            .collect::<Vec<String>>()
            .join(&source.delimiter)
    }
}

#[cfg(test)]
mod test {
    use common::config::{TextSourceConfig};
    use common::value::FilterValue;

    use super::*;
    use crate::column::ColumnType;
    use crate::events::rows_event::test_support::{build_rows_event, varchar_field};
    use crate::events::table_map_event::test_support::build_table_map;

    fn frame(event: Vec<u8>) -> Vec<u8> {
        let mut framed = vec![0u8]; // status byte
        framed.extend_from_slice(&event);
        framed
    }

    fn decoder() -> EventDecoder {
        let articles = TableConfig {
            name: "articles".into(),
            primary_key: "id".into(),
            text_source: TextSourceConfig {
                column: "content".into(),
                ..Default::default()
            },
            required_filters: vec![common::config::RequiredFilterConfig {
                name: "status".into(),
                filter_type: common::config::FilterType::Int,
                op: "=".into(),
                value: "1".into(),
            }],
            ..Default::default()
        };
        let comments = TableConfig {
            name: "comments".into(),
            primary_key: "comment_id".into(),
            text_source: TextSourceConfig {
                column: "body".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        EventDecoder::new(vec![articles, comments], FixedOffset::east_opt(0).unwrap())
    }

    fn articles_table_map(table_id: u64) -> Vec<u8> {
        build_table_map(
            table_id,
            "app",
            "articles",
            &[
                (ColumnType::Long, 0, false),
                (ColumnType::Varchar, 255, false),
                (ColumnType::Tiny, 0, false),
            ],
            &["id", "content", "status"],
        )
    }

    fn article_image(id: u32, content: &str, status: u8) -> (Vec<usize>, Vec<u8>) {
        let mut fields = Vec::new();
        fields.extend_from_slice(&id.to_le_bytes());
        fields.extend_from_slice(&varchar_field(content));
        fields.push(status);
        (vec![], fields)
    }

    fn primed_cache(decoder: &EventDecoder, table_id: u64) -> TableMetadataCache {
        let mut cache = TableMetadataCache::new();
        let decoded = decoder.decode(&frame(articles_table_map(table_id)), &cache).unwrap();
        let DecodedEvent::TableMap(metadata) = decoded else { panic!("expected table map") };
        cache.add_or_update(metadata);
        cache
    }

    #[test]
    fn gtid_event_updates_cursor() {
        let decoder = decoder();
        let cache = TableMetadataCache::new();
        let uuid = hex::decode("61d5b289bccc11f0b921cabbb4ee51f6").unwrap();
        let mut body = vec![1u8];
        body.extend_from_slice(&uuid);
        body.extend_from_slice(&7u64.to_le_bytes());
        let event_size = (19 + body.len() + 4) as u32;
        let mut event = Vec::new();
        event.extend_from_slice(&0u32.to_le_bytes());
        event.push(EventType::Gtid as u8);
        event.extend_from_slice(&1u32.to_le_bytes());
        event.extend_from_slice(&event_size.to_le_bytes());
        event.extend_from_slice(&0u32.to_le_bytes());
        event.extend_from_slice(&0u16.to_le_bytes());
        event.extend_from_slice(&body);
        event.extend_from_slice(&[0u8; 4]);

        match decoder.decode(&frame(event), &cache).unwrap() {
            DecodedEvent::Gtid(gtid) => assert_eq!(gtid, "61d5b289-bccc-11f0-b921-cabbb4ee51f6:7"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn write_rows_become_insert_events() {
        let decoder = decoder();
        let cache = primed_cache(&decoder, 7);

        let rows = build_rows_event(EventType::WriteRows, 7, 3, &[article_image(100, "hello world", 1)]);
        match decoder.decode(&frame(rows), &cache).unwrap() {
            DecodedEvent::Events(events) => {
                assert_eq!(events.len(), 1);
                let BinlogEvent::Insert { table, primary_key, text, filters, .. } = &events[0] else {
                    panic!("expected insert");
                };
                assert_eq!(table, "articles");
                assert_eq!(primary_key, "100");
                assert_eq!(text, "hello world");
                assert_eq!(filters["status"], FilterValue::Int(1));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn update_rows_carry_old_and_new_text() {
        let decoder = decoder();
        let cache = primed_cache(&decoder, 7);

        let rows = build_rows_event(
            EventType::UpdateRows,
            7,
            3,
            &[
                article_image(100, "hello world", 1),
                article_image(100, "goodbye universe", 1),
            ],
        );
        match decoder.decode(&frame(rows), &cache).unwrap() {
            DecodedEvent::Events(events) => {
                let BinlogEvent::Update { old_text, new_text, .. } = &events[0] else {
                    panic!("expected update");
                };
                assert_eq!(old_text, "hello world");
                assert_eq!(new_text, "goodbye universe");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn unknown_table_id_is_skipped() {
        let decoder = decoder();
        let cache = primed_cache(&decoder, 7);
        let rows = build_rows_event(EventType::WriteRows, 99, 3, &[article_image(1, "x", 1)]);
        assert!(matches!(decoder.decode(&frame(rows), &cache).unwrap(), DecodedEvent::Ignored));
    }

    #[test]
    fn unconfigured_table_is_skipped() {
        let decoder = decoder();
        let mut cache = TableMetadataCache::new();
        let map = build_table_map(50, "app", "audit_log", &[(ColumnType::Long, 0, false)], &["id"]);
        let DecodedEvent::TableMap(metadata) = decoder.decode(&frame(map), &cache).unwrap() else {
            panic!("expected table map");
        };
        cache.add_or_update(metadata);

        let mut fields = Vec::new();
        fields.extend_from_slice(&1u32.to_le_bytes());
        let rows = build_rows_event(EventType::WriteRows, 50, 1, &[(vec![], fields)]);
        assert!(matches!(decoder.decode(&frame(rows), &cache).unwrap(), DecodedEvent::Ignored));
    }

    #[test]
    fn xid_is_commit_marker() {
        let decoder = decoder();
        let cache = TableMetadataCache::new();
        let mut event = Vec::new();
        event.extend_from_slice(&0u32.to_le_bytes());
        event.push(EventType::Xid as u8);
        event.extend_from_slice(&1u32.to_le_bytes());
        event.extend_from_slice(&31u32.to_le_bytes());
        event.extend_from_slice(&0u32.to_le_bytes());
        event.extend_from_slice(&0u16.to_le_bytes());
        event.extend_from_slice(&1u64.to_le_bytes()); // xid
        event.extend_from_slice(&[0u8; 4]);
        assert!(matches!(decoder.decode(&frame(event), &cache).unwrap(), DecodedEvent::Commit));
    }

    #[test]
    fn multi_table_ddl_routing() {
        let decoder = decoder();
        let cache = TableMetadataCache::new();

        let statement = b"TRUNCATE TABLE articles";
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(3);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(b"app");
        body.push(0);
        body.extend_from_slice(statement);
        let event_size = (19 + body.len() + 4) as u32;
        let mut event = Vec::new();
        event.extend_from_slice(&0u32.to_le_bytes());
        event.push(EventType::Query as u8);
        event.extend_from_slice(&1u32.to_le_bytes());
        event.extend_from_slice(&event_size.to_le_bytes());
        event.extend_from_slice(&0u32.to_le_bytes());
        event.extend_from_slice(&0u16.to_le_bytes());
        event.extend_from_slice(&body);
        event.extend_from_slice(&[0u8; 4]);

        match decoder.decode(&frame(event), &cache).unwrap() {
            DecodedEvent::Events(events) => {
                assert_eq!(events.len(), 1);
                let BinlogEvent::Ddl { table, sql_upper, .. } = &events[0] else {
                    panic!("expected ddl");
                };
                assert_eq!(table, "articles");
                assert_eq!(sql_upper, "TRUNCATE TABLE ARTICLES");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
