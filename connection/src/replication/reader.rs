use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use binlog::decoder::{DecodedEvent, EventDecoder};
use binlog::events::BinlogEvent;
use binlog::gtid::GtidSet;
use binlog::metadata::TableMetadataCache;
use common::err::{CResult, Error};
use common::structure::queue::BoundedQueue;

use crate::transport::BinlogTransport;

/// Ceiling on the backoff multiplier.
const MAX_BACKOFF_MULTIPLIER: u64 = 10;

/// Granularity at which backoff sleeps re-check the stop flag.
const BACKOFF_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub server_id: u32,
    /// GTID set replication resumes from.
    pub start_gtid: String,
    pub reconnect_delay_ms: u64,
}

/// Counters the fetch loop maintains; read by INFO.
#[derive(Debug, Default)]
pub struct ReaderStats {
    pub events_fetched: AtomicU64,
    pub events_enqueued: AtomicU64,
    pub rows_rejected: AtomicU64,
    pub reconnects: AtomicU64,
}

/// The long-lived fetch side of replication.
///
/// Owns the transport and the table-metadata cache on a dedicated thread,
/// decodes frames, runs the required-filter gate, stamps the current GTID,
/// and pushes accepted events into the bounded queue the apply worker
/// drains. `stop()` joins the thread before the transport is dropped, so a
/// concurrent fetch can never touch freed connection state.
pub struct ReplicationReader {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    current_gtid: Arc<Mutex<String>>,
    stats: Arc<ReaderStats>,
}

impl ReplicationReader {
    /// `current_gtid` is a shared cell (typically surfaced by INFO) the
    /// fetch loop keeps pointed at the last GTID event it saw.
    pub fn start(
        transport: Box<dyn BinlogTransport>,
        decoder: EventDecoder,
        queue: Arc<BoundedQueue<BinlogEvent>>,
        options: ReaderOptions,
        current_gtid: Arc<Mutex<String>>,
    ) -> CResult<ReplicationReader> {
        let should_stop = Arc::new(AtomicBool::new(false));
        *current_gtid.lock().unwrap() = options.start_gtid.clone();
        let stats = Arc::new(ReaderStats::default());

        let thread_stop = Arc::clone(&should_stop);
        let thread_gtid = Arc::clone(&current_gtid);
        let thread_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name("replication-fetch".to_string())
            .spawn(move || {
                fetch_loop(transport, decoder, queue, options, thread_stop, thread_gtid, thread_stats);
            })
            .map_err(|e| Error::Internal(format!("cannot spawn fetch thread: {}", e)))?;

        Ok(ReplicationReader {
            should_stop,
            handle: Some(handle),
            current_gtid,
            stats,
        })
    }

    /// GTID of the last GTID event seen by the fetch loop. Not yet applied.
    pub fn current_gtid(&self) -> String {
        self.current_gtid.lock().unwrap().clone()
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Signals the fetch loop and joins it. The transport lives inside the
    /// fetch thread and is only dropped after the join, which is what makes
    /// a concurrent stop safe.
    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReplicationReader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn fetch_loop(
    mut transport: Box<dyn BinlogTransport>,
    decoder: EventDecoder,
    queue: Arc<BoundedQueue<BinlogEvent>>,
    options: ReaderOptions,
    should_stop: Arc<AtomicBool>,
    current_gtid: Arc<Mutex<String>>,
    stats: Arc<ReaderStats>,
) {
    info!(event = "replication", state = "starting", start_gtid = %options.start_gtid);

    let mut metadata_cache = TableMetadataCache::new();
    // The set of transactions this replica has seen; the subscription
    // position on every (re)connect.
    let mut seen_gtids = match GtidSet::parse(&options.start_gtid) {
        Ok(set) => set,
        Err(e) => {
            error!(event = "replication", error = %e, "invalid start GTID, reader not starting");
            return;
        }
    };

    let mut attempt: u64 = 0;
    'reconnect: while !should_stop.load(Ordering::Acquire) {
        if attempt > 0 {
            stats.reconnects.fetch_add(1, Ordering::Relaxed);
            let delay = options.reconnect_delay_ms * attempt.min(MAX_BACKOFF_MULTIPLIER);
            info!(event = "replication", state = "backoff", attempt, delay_ms = delay);
            if !sleep_interruptible(Duration::from_millis(delay), &should_stop) {
                break;
            }
        }

        let subscribe_from = seen_gtids.to_string();
        match open_stream(transport.as_mut(), &options, &subscribe_from) {
            Ok(()) => {
                attempt = 0;
                info!(event = "replication", state = "streaming", from = %subscribe_from);
            }
            Err(e) if e.is_transient() => {
                warn!(event = "replication", state = "connect_failed", error = %e);
                transport.close();
                attempt += 1;
                continue;
            }
            Err(e) => {
                error!(event = "replication", state = "fatal", error = %e, "replication reader stopping");
                break;
            }
        }

        // Streaming.
        loop {
            let fetched = transport.fetch_event();
            // The only safe point to observe a concurrent stop: the blocking
            // call has returned, nothing touches the connection after this
            // check.
            if should_stop.load(Ordering::Acquire) {
                break 'reconnect;
            }
            match fetched {
                Ok(Some(frame)) => {
                    stats.events_fetched.fetch_add(1, Ordering::Relaxed);
                    handle_frame(
                        &frame,
                        &decoder,
                        &mut metadata_cache,
                        &mut seen_gtids,
                        &current_gtid,
                        &queue,
                        &stats,
                        &should_stop,
                    );
                }
                Ok(None) => {
                    warn!(event = "replication", state = "stream_ended", "upstream closed the stream");
                    transport.close();
                    attempt += 1;
                    continue 'reconnect;
                }
                Err(e) if e.is_transient() => {
                    warn!(event = "replication", state = "connection_lost", error = %e);
                    transport.close();
                    attempt += 1;
                    continue 'reconnect;
                }
                Err(e) => {
                    error!(event = "replication", state = "fatal", error = %e, "replication reader stopping");
                    break 'reconnect;
                }
            }
        }
    }

    transport.close();
    info!(event = "replication", state = "stopped");
}

fn open_stream(transport: &mut dyn BinlogTransport, options: &ReaderOptions, gtid_set: &str) -> CResult<()> {
    transport.connect()?;
    transport.verify_gtid_mode()?;
    transport.disable_checksum()?;
    transport.subscribe(options.server_id, gtid_set)
}

#[allow(clippy::too_many_arguments)]
fn handle_frame(
    frame: &[u8],
    decoder: &EventDecoder,
    metadata_cache: &mut TableMetadataCache,
    seen_gtids: &mut GtidSet,
    current_gtid: &Arc<Mutex<String>>,
    queue: &Arc<BoundedQueue<BinlogEvent>>,
    stats: &Arc<ReaderStats>,
    should_stop: &Arc<AtomicBool>,
) {
    let decoded = match decoder.decode(frame, metadata_cache) {
        Ok(decoded) => decoded,
        Err(e) => {
            // Event-granular decode failure: drop it, the upstream sends a
            // fresh TABLE_MAP soon enough.
            warn!(event = "mysql_binlog_warning", error = %e, "dropping undecodable event");
            return;
        }
    };

    match decoded {
        DecodedEvent::Gtid(gtid) => {
            if let Err(e) = seen_gtids.add_gtid(&gtid) {
                warn!(event = "mysql_binlog_warning", gtid = %gtid, error = %e, "cannot track GTID");
            }
            *current_gtid.lock().unwrap() = gtid;
        }
        DecodedEvent::TableMap(metadata) => {
            metadata_cache.add_or_update(metadata);
        }
        DecodedEvent::Events(events) => {
            let gtid = current_gtid.lock().unwrap().clone();
            for mut event in events {
                event.set_gtid(&gtid);
                let Some(accepted) = gate_event(event, decoder, stats) else {
                    continue;
                };
                if queue.push(accepted).is_err() {
                    // Queue closed under shutdown; remaining events are
                    // re-fetched after the next start from the state file.
                    debug!(event = "replication", state = "queue_closed");
                    return;
                }
                stats.events_enqueued.fetch_add(1, Ordering::Relaxed);
                if should_stop.load(Ordering::Acquire) {
                    return;
                }
            }
        }
        DecodedEvent::Commit | DecodedEvent::Ignored => {}
    }
}

/// The required-filter gate.
///
/// Inserts that fail are dropped. Updates that fail become deletes: the row
/// no longer qualifies, and a previously accepted image may still be
/// indexed. Deletes and DDL pass through untouched (removing an absent
/// document is a no-op downstream).
fn gate_event(event: BinlogEvent, decoder: &EventDecoder, stats: &Arc<ReaderStats>) -> Option<BinlogEvent> {
    let accepted = match decoder.table_config(event.table()) {
        Some(table_config) => match &event {
            BinlogEvent::Insert { filters, .. } | BinlogEvent::Update { filters, .. } => {
                decoder.evaluator().evaluate_required(filters, table_config)
            }
            BinlogEvent::Delete { .. } | BinlogEvent::Ddl { .. } => true,
        },
        None => return None,
    };
    if accepted {
        return Some(event);
    }
    stats.rows_rejected.fetch_add(1, Ordering::Relaxed);
    match event {
        BinlogEvent::Insert { primary_key, .. } => {
            debug!(event = "binlog_filter", action = "insert_rejected", pk = %primary_key);
            None
        }
        BinlogEvent::Update {
            table,
            primary_key,
            old_text,
            gtid,
            ..
        } => {
            debug!(event = "binlog_filter", action = "update_rejected_becomes_delete", pk = %primary_key);
            Some(BinlogEvent::Delete {
                table,
                primary_key,
                text: old_text,
                filters: common::value::FilterMap::new(),
                gtid,
            })
        }
        other => Some(other),
    }
}

/// Sleeps in small slices so a stop request is honoured promptly. Returns
/// false when stopping.
fn sleep_interruptible(total: Duration, should_stop: &Arc<AtomicBool>) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if should_stop.load(Ordering::Acquire) {
            return false;
        }
        let slice = remaining.min(BACKOFF_POLL);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    !should_stop.load(Ordering::Acquire)
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use chrono::FixedOffset;
    use common::config::{FilterType, RequiredFilterConfig, TableConfig, TextSourceConfig};

    use binlog::column::ColumnType;
    use binlog::events::rows_event::test_support::{build_rows_event, varchar_field};
    use binlog::events::table_map_event::test_support::build_table_map;
    use binlog::events::EventType;

    use super::*;

    /// Scripted transport: hands out pre-framed events, then a scripted
    /// outcome per fetch.
    struct ScriptedTransport {
        script: Mutex<VecDeque<CResult<Option<Vec<u8>>>>>,
        connects: Arc<AtomicUsize>,
        subscriptions: Arc<Mutex<Vec<String>>>,
        fail_connects: usize,
    }

    impl BinlogTransport for ScriptedTransport {
        fn connect(&mut self) -> CResult<()> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_connects {
                return Err(Error::Unavailable("scripted connect failure".to_string()));
            }
            Ok(())
        }

        fn verify_gtid_mode(&mut self) -> CResult<()> {
            Ok(())
        }

        fn disable_checksum(&mut self) -> CResult<()> {
            Ok(())
        }

        fn subscribe(&mut self, _server_id: u32, gtid_set: &str) -> CResult<()> {
            self.subscriptions.lock().unwrap().push(gtid_set.to_string());
            Ok(())
        }

        fn fetch_event(&mut self) -> CResult<Option<Vec<u8>>> {
            match self.script.lock().unwrap().pop_front() {
                Some(outcome) => outcome,
                None => {
                    // Script exhausted: behave like a quiet stream.
                    thread::sleep(Duration::from_millis(10));
                    Ok(Some(frame_of(heartbeat_event())))
                }
            }
        }

        fn close(&mut self) {}
    }

    fn frame_of(event: Vec<u8>) -> Vec<u8> {
        let mut frame = vec![0u8];
        frame.extend_from_slice(&event);
        frame
    }

    /// A FORMAT_DESCRIPTION-ish event the decoder ignores.
    fn heartbeat_event() -> Vec<u8> {
        let mut event = Vec::new();
        event.extend_from_slice(&0u32.to_le_bytes());
        event.push(EventType::Rotate as u8);
        event.extend_from_slice(&1u32.to_le_bytes());
        event.extend_from_slice(&31u32.to_le_bytes());
        event.extend_from_slice(&0u32.to_le_bytes());
        event.extend_from_slice(&0u16.to_le_bytes());
        event.extend_from_slice(&[0u8; 8]);
        event.extend_from_slice(&[0u8; 4]);
        event
    }

    fn gtid_event(gno: u64) -> Vec<u8> {
        let uuid = hex::decode("61d5b289bccc11f0b921cabbb4ee51f6").unwrap();
        let mut body = vec![1u8];
        body.extend_from_slice(&uuid);
        body.extend_from_slice(&gno.to_le_bytes());
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
        event
    }

    fn articles_config() -> TableConfig {
        TableConfig {
            name: "articles".into(),
            primary_key: "id".into(),
            text_source: TextSourceConfig {
                column: "content".into(),
                ..Default::default()
            },
            required_filters: vec![RequiredFilterConfig {
                name: "status".into(),
                filter_type: FilterType::Int,
                op: "=".into(),
                value: "1".into(),
            }],
            ..Default::default()
        }
    }

    fn articles_map() -> Vec<u8> {
        build_table_map(
            7,
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

    fn article_row(id: u32, content: &str, status: u8) -> (Vec<usize>, Vec<u8>) {
        let mut fields = Vec::new();
        fields.extend_from_slice(&id.to_le_bytes());
        fields.extend_from_slice(&varchar_field(content));
        fields.push(status);
        (vec![], fields)
    }

    fn run_script(script: Vec<CResult<Option<Vec<u8>>>>, fail_connects: usize) -> (Vec<BinlogEvent>, Vec<String>, String) {
        let transport = ScriptedTransport {
            script: Mutex::new(script.into_iter().collect()),
            connects: Arc::new(AtomicUsize::new(0)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            fail_connects,
        };
        let subscriptions = Arc::clone(&transport.subscriptions);

        let decoder = EventDecoder::new(vec![articles_config()], FixedOffset::east_opt(0).unwrap());
        let queue = Arc::new(BoundedQueue::with_capacity(100));
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

        // Let the loop chew through the script.
        thread::sleep(Duration::from_millis(300));
        let current = reader.current_gtid();
        reader.stop();

        let mut drained = Vec::new();
        queue.close();
        while let Some(event) = queue.pop() {
            drained.push(event);
        }
        let subs = subscriptions.lock().unwrap().clone();
        (drained, subs, current)
    }

    #[test]
    fn events_flow_in_commit_order_with_gtid_stamps() {
        let script = vec![
            Ok(Some(frame_of(gtid_event(1)))),
            Ok(Some(frame_of(articles_map()))),
            Ok(Some(frame_of(build_rows_event(
                EventType::WriteRows,
                7,
                3,
                &[article_row(100, "hello world", 1)],
            )))),
            Ok(Some(frame_of(gtid_event(2)))),
            Ok(Some(frame_of(build_rows_event(
                EventType::UpdateRows,
                7,
                3,
                &[article_row(100, "hello world", 1), article_row(100, "goodbye", 1)],
            )))),
        ];
        let (events, _, current) = run_script(script, 0);

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], BinlogEvent::Insert { .. }));
        assert!(matches!(&events[1], BinlogEvent::Update { .. }));
        assert_eq!(events[0].gtid(), "61d5b289-bccc-11f0-b921-cabbb4ee51f6:1");
        assert_eq!(events[1].gtid(), "61d5b289-bccc-11f0-b921-cabbb4ee51f6:2");
        assert_eq!(current, "61d5b289-bccc-11f0-b921-cabbb4ee51f6:2");
    }

    #[test]
    fn rejected_insert_dropped_rejected_update_becomes_delete() {
        let script = vec![
            Ok(Some(frame_of(gtid_event(1)))),
            Ok(Some(frame_of(articles_map()))),
            // status=0 fails the required filter: dropped.
            Ok(Some(frame_of(build_rows_event(
                EventType::WriteRows,
                7,
                3,
                &[article_row(5, "nope", 0)],
            )))),
            // update to status=0: becomes a delete of the old image.
            Ok(Some(frame_of(build_rows_event(
                EventType::UpdateRows,
                7,
                3,
                &[article_row(100, "goodbye universe", 1), article_row(100, "x", 0)],
            )))),
        ];
        let (events, _, _) = run_script(script, 0);

        assert_eq!(events.len(), 1);
        let BinlogEvent::Delete { primary_key, text, .. } = &events[0] else {
            panic!("expected delete, got {:?}", events[0]);
        };
        assert_eq!(primary_key, "100");
        assert_eq!(text, "goodbye universe");
    }

    #[test]
    fn transient_errors_reconnect_and_resubscribe_from_seen_gtids() {
        let script = vec![
            Ok(Some(frame_of(gtid_event(1)))),
            Err(Error::Unavailable("connection lost".to_string())),
            Ok(Some(frame_of(gtid_event(2)))),
        ];
        let (_, subs, current) = run_script(script, 0);

        assert!(subs.len() >= 2, "expected a resubscription, got {:?}", subs);
        assert_eq!(subs[0], "");
        // After seeing transaction 1, the resubscription carries it.
        assert_eq!(subs[1], "61d5b289-bccc-11f0-b921-cabbb4ee51f6:1");
        assert_eq!(current, "61d5b289-bccc-11f0-b921-cabbb4ee51f6:2");
    }

    #[test]
    fn connect_failures_back_off_then_recover() {
        let script = vec![Ok(Some(frame_of(gtid_event(1))))];
        let (_, subs, current) = run_script(script, 2);
        assert!(!subs.is_empty());
        assert_eq!(current, "61d5b289-bccc-11f0-b921-cabbb4ee51f6:1");
    }

    #[test]
    fn fatal_error_stops_reader() {
        let script = vec![
            Ok(Some(frame_of(gtid_event(1)))),
            Err(Error::PermissionDenied("auth revoked".to_string())),
            // Never reached.
            Ok(Some(frame_of(gtid_event(2)))),
        ];
        let (_, _, current) = run_script(script, 0);
        assert_eq!(current, "61d5b289-bccc-11f0-b921-cabbb4ee51f6:1");
    }
}
