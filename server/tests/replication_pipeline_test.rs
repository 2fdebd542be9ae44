//! Whole-pipeline tests: scripted wire frames flow through the fetch loop,
//! the bounded queue and the apply worker into the catalog.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::FixedOffset;

use binlog::column::ColumnType;
use binlog::decoder::EventDecoder;
use binlog::events::rows_event::test_support::{build_rows_event, varchar_field};
use binlog::events::table_map_event::test_support::build_table_map;
use binlog::events::{BinlogEvent, EventType};
use binlog::gtid::GtidSet;
use cache::CacheManager;
use common::config::{CacheConfig, FilterType, RequiredFilterConfig, TableConfig, TextSourceConfig};
use common::err::CResult;
use common::structure::queue::BoundedQueue;
use common::value::FilterValue;
use connection::replication::{ReaderOptions, ReplicationReader};
use connection::BinlogTransport;
use server::replication::{ApplyOptions, ApplyWorker};
use server::stats::ServerStats;
use server::TableCatalog;

const SID_HEX: &str = "61d5b289bccc11f0b921cabbb4ee51f6";
const SID: &str = "61d5b289-bccc-11f0-b921-cabbb4ee51f6";

struct ScriptedTransport {
    frames: Mutex<VecDeque<Vec<u8>>>,
}

impl BinlogTransport for ScriptedTransport {
    fn connect(&mut self) -> CResult<()> {
        Ok(())
    }
    fn verify_gtid_mode(&mut self) -> CResult<()> {
        Ok(())
    }
    fn disable_checksum(&mut self) -> CResult<()> {
        Ok(())
    }
    fn subscribe(&mut self, _server_id: u32, _gtid_set: &str) -> CResult<()> {
        Ok(())
    }
    fn fetch_event(&mut self) -> CResult<Option<Vec<u8>>> {
        match self.frames.lock().unwrap().pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                thread::sleep(Duration::from_millis(10));
                Ok(Some(frame(rotate_event())))
            }
        }
    }
    fn close(&mut self) {}
}

fn frame(event: Vec<u8>) -> Vec<u8> {
    let mut framed = vec![0u8];
    framed.extend_from_slice(&event);
    framed
}

fn header(event_type: EventType, body: &[u8]) -> Vec<u8> {
    let event_size = (19 + body.len() + 4) as u32;
    let mut event = Vec::new();
    event.extend_from_slice(&0u32.to_le_bytes());
    event.push(event_type as u8);
    event.extend_from_slice(&1u32.to_le_bytes());
    event.extend_from_slice(&event_size.to_le_bytes());
    event.extend_from_slice(&0u32.to_le_bytes());
    event.extend_from_slice(&0u16.to_le_bytes());
    event.extend_from_slice(body);
    event.extend_from_slice(&[0u8; 4]);
    event
}

fn rotate_event() -> Vec<u8> {
    header(EventType::Rotate, &[0u8; 8])
}

fn gtid_event(gno: u64) -> Vec<u8> {
    let mut body = vec![1u8];
    body.extend_from_slice(&hex::decode(SID_HEX).unwrap());
    body.extend_from_slice(&gno.to_le_bytes());
    header(EventType::Gtid, &body)
}

fn articles_config() -> TableConfig {
    TableConfig {
        name: "articles".into(),
        primary_key: "id".into(),
        text_source: TextSourceConfig {
            column: "content".into(),
            ..Default::default()
        },
        ngram_size: 2,
        required_filters: vec![RequiredFilterConfig {
            name: "status".into(),
            filter_type: FilterType::Int,
            op: "=".into(),
            value: "1".into(),
        }],
        ..Default::default()
    }
}

fn comments_config() -> TableConfig {
    TableConfig {
        name: "comments".into(),
        primary_key: "comment_id".into(),
        text_source: TextSourceConfig {
            column: "body".into(),
            ..Default::default()
        },
        ngram_size: 2,
        ..Default::default()
    }
}

fn articles_map(table_id: u64) -> Vec<u8> {
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

fn comments_map(table_id: u64) -> Vec<u8> {
    build_table_map(
        table_id,
        "app",
        "comments",
        &[(ColumnType::Long, 0, false), (ColumnType::Varchar, 255, false)],
        &["comment_id", "body"],
    )
}

fn article_row(id: u32, content: &str, status: u8) -> (Vec<usize>, Vec<u8>) {
    let mut fields = Vec::new();
    fields.extend_from_slice(&id.to_le_bytes());
    fields.extend_from_slice(&varchar_field(content));
    fields.push(status);
    (vec![], fields)
}

fn comment_row(id: u32, body: &str) -> (Vec<usize>, Vec<u8>) {
    let mut fields = Vec::new();
    fields.extend_from_slice(&id.to_le_bytes());
    fields.extend_from_slice(&varchar_field(body));
    (vec![], fields)
}

/// Runs frames through reader + apply worker against a fresh catalog.
fn run_pipeline(frames: Vec<Vec<u8>>, tables: Vec<TableConfig>) -> (Arc<TableCatalog>, Arc<Mutex<GtidSet>>) {
    let catalog = Arc::new(TableCatalog::from_configs(&tables));
    let cache = Arc::new(CacheManager::new(&CacheConfig {
        enabled: true,
        max_memory_bytes: 1 << 20,
        min_query_cost_ms: 0.0,
        ttl_seconds: 0,
    }));
    let stats = Arc::new(ServerStats::new());
    let applied = Arc::new(Mutex::new(GtidSet::new()));
    let queue: Arc<BoundedQueue<BinlogEvent>> = Arc::new(BoundedQueue::with_capacity(1000));

    let mut apply_worker = ApplyWorker::start(
        Arc::clone(&queue),
        Arc::clone(&catalog),
        Arc::clone(&cache),
        stats,
        Arc::clone(&applied),
        ApplyOptions {
            state_write_interval_events: 0,
            state_file: None,
        },
    )
    .unwrap();

    let decoder = EventDecoder::new(tables, FixedOffset::east_opt(0).unwrap());
    let transport = ScriptedTransport {
        frames: Mutex::new(frames.into_iter().collect()),
    };
    let mut reader = ReplicationReader::start(
        Box::new(transport),
        decoder,
        Arc::clone(&queue),
        ReaderOptions {
            server_id: 99,
            start_gtid: String::new(),
            reconnect_delay_ms: 10,
        },
        Arc::new(Mutex::new(String::new())),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(300));
    reader.stop();
    queue.close();
    apply_worker.stop();
    cache.stop();

    (catalog, applied)
}

#[test]
fn insert_update_then_filter_rejected_update_removes_document() {
    // The seed scenario: INSERT, text UPDATE, then an UPDATE that drops the
    // row out of the required filter.
    let frames = vec![
        frame(gtid_event(1)),
        frame(articles_map(7)),
        frame(build_rows_event(
            EventType::WriteRows,
            7,
            3,
            &[article_row(100, "hello world", 1)],
        )),
        frame(gtid_event(2)),
        frame(build_rows_event(
            EventType::UpdateRows,
            7,
            3,
            &[
                article_row(100, "hello world", 1),
                article_row(100, "goodbye universe", 1),
            ],
        )),
        frame(gtid_event(3)),
        frame(build_rows_event(
            EventType::UpdateRows,
            7,
            3,
            &[article_row(100, "goodbye universe", 1), article_row(100, "x", 0)],
        )),
    ];

    let (catalog, applied) = run_pipeline(frames, vec![articles_config()]);
    let table_ctx = catalog.get("articles").unwrap();
    let state = table_ctx.read();

    // Document 100 is gone entirely.
    assert_eq!(state.docs.get_doc_id("100"), None);
    assert_eq!(state.docs.doc_count(), 0);
    assert!(state.index.search_and(&state.index.grams("go")).is_empty());
    assert!(state.index.search_and(&state.index.grams("he")).is_empty());

    // The applied cursor reflects the last transaction.
    assert_eq!(applied.lock().unwrap().to_string(), format!("{}:1-3", SID));
}

#[test]
fn intermediate_state_after_text_update() {
    let frames = vec![
        frame(gtid_event(1)),
        frame(articles_map(7)),
        frame(build_rows_event(
            EventType::WriteRows,
            7,
            3,
            &[article_row(100, "hello world", 1)],
        )),
        frame(gtid_event(2)),
        frame(build_rows_event(
            EventType::UpdateRows,
            7,
            3,
            &[
                article_row(100, "hello world", 1),
                article_row(100, "goodbye universe", 1),
            ],
        )),
    ];

    let (catalog, _) = run_pipeline(frames, vec![articles_config()]);
    let state = catalog.get("articles").unwrap().read();

    assert_eq!(state.docs.get_doc_id("100"), Some(1));
    // Postings for the old text exclude the doc, postings for the new text
    // include it.
    assert!(state.index.search_and(&state.index.grams("he")).is_empty());
    assert_eq!(state.index.search_and(&state.index.grams("go")), vec![1]);
    assert_eq!(
        state.docs.get_by_primary_key("100").unwrap().filters["status"],
        FilterValue::Int(1)
    );
}

#[test]
fn multi_table_routing_isolates_tables() {
    let frames = vec![
        frame(gtid_event(1)),
        frame(articles_map(7)),
        frame(comments_map(8)),
        frame(build_rows_event(
            EventType::WriteRows,
            7,
            3,
            &[article_row(1, "article text", 1)],
        )),
        frame(gtid_event(2)),
        frame(build_rows_event(EventType::WriteRows, 8, 2, &[comment_row(50, "comment body")])),
        frame(gtid_event(3)),
        // Unregistered table_id: no side effects anywhere.
        frame(build_rows_event(EventType::WriteRows, 99, 3, &[article_row(2, "ghost", 1)])),
    ];

    let (catalog, _) = run_pipeline(frames, vec![articles_config(), comments_config()]);

    let articles = catalog.get("articles").unwrap().read();
    assert_eq!(articles.docs.doc_count(), 1);
    assert_eq!(articles.docs.get_doc_id("1"), Some(1));
    assert_eq!(articles.docs.get_doc_id("2"), None);

    let comments = catalog.get("comments").unwrap().read();
    assert_eq!(comments.docs.doc_count(), 1);
    assert_eq!(comments.docs.get_doc_id("50"), Some(1));
    // The comment text landed in the comments index only.
    assert_eq!(comments.index.search_and(&comments.index.grams("comment")), vec![1]);
    assert!(articles.index.search_and(&articles.index.grams("comment")).is_empty());
}

#[test]
fn truncate_ddl_clears_one_table() {
    let mut ddl_body = Vec::new();
    ddl_body.extend_from_slice(&1u32.to_le_bytes()); // thread id
    ddl_body.extend_from_slice(&0u32.to_le_bytes()); // exec time
    ddl_body.push(3); // db len
    ddl_body.extend_from_slice(&0u16.to_le_bytes()); // error code
    ddl_body.extend_from_slice(&0u16.to_le_bytes()); // status vars len
    ddl_body.extend_from_slice(b"app");
    ddl_body.push(0);
    ddl_body.extend_from_slice(b"TRUNCATE TABLE articles");

    let frames = vec![
        frame(gtid_event(1)),
        frame(articles_map(7)),
        frame(build_rows_event(
            EventType::WriteRows,
            7,
            3,
            &[article_row(1, "some text", 1)],
        )),
        frame(gtid_event(2)),
        frame(header(EventType::Query, &ddl_body)),
    ];

    let (catalog, applied) = run_pipeline(frames, vec![articles_config(), comments_config()]);
    let state = catalog.get("articles").unwrap().read();
    assert_eq!(state.docs.doc_count(), 0);
    assert_eq!(state.index.term_count(), 0);
    assert_eq!(applied.lock().unwrap().to_string(), format!("{}:1-2", SID));
}
