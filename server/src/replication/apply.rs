use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use binlog::events::query_event::{classify_ddl, DdlOp};
use binlog::events::BinlogEvent;
use binlog::gtid::GtidSet;
use cache::CacheManager;
use common::err::{CResult, Error};
use common::structure::queue::BoundedQueue;
use common::time_util;
use storage::GtidStateFile;

use crate::catalog::TableCatalog;
use crate::stats::ServerStats;

/// How long a pop waits before re-checking the stop flag.
const POP_POLL: Duration = Duration::from_millis(100);

/// Pause while the catalog is read-only (a dump is being written).
const READ_ONLY_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Events between applied-GTID persistence; 0 disables periodic writes.
    pub state_write_interval_events: u64,
    pub state_file: Option<String>,
}

/// The single consumer of the replication queue.
///
/// Events apply in exactly the order the fetch loop enqueued them, which is
/// upstream commit order; together with the catalog's single-writer rule
/// that makes applied state commit-serial. After every event the applied
/// cursor advances, even when the event itself was skipped, so one missing
/// row can never wedge replication.
pub struct ApplyWorker {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ApplyWorker {
    pub fn start(
        queue: Arc<BoundedQueue<BinlogEvent>>,
        catalog: Arc<TableCatalog>,
        cache: Arc<CacheManager>,
        stats: Arc<ServerStats>,
        applied_gtid: Arc<Mutex<GtidSet>>,
        options: ApplyOptions,
    ) -> CResult<ApplyWorker> {
        let should_stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&should_stop);

        let handle = thread::Builder::new()
            .name("replication-apply".to_string())
            .spawn(move || {
                apply_loop(queue, catalog, cache, stats, applied_gtid, options, thread_stop);
            })
            .map_err(|e| Error::Internal(format!("cannot spawn apply thread: {}", e)))?;

        Ok(ApplyWorker {
            should_stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ApplyWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn apply_loop(
    queue: Arc<BoundedQueue<BinlogEvent>>,
    catalog: Arc<TableCatalog>,
    cache: Arc<CacheManager>,
    stats: Arc<ServerStats>,
    applied_gtid: Arc<Mutex<GtidSet>>,
    options: ApplyOptions,
    should_stop: Arc<AtomicBool>,
) {
    info!(event = "apply_worker", state = "started");
    let state_file = options.state_file.as_ref().map(GtidStateFile::new);
    let mut processed: u64 = 0;

    loop {
        if should_stop.load(Ordering::Acquire) && queue.is_empty() {
            break;
        }
        let Some(event) = queue.pop_timeout(POP_POLL) else {
            if queue.is_closed() && queue.is_empty() {
                break;
            }
            continue;
        };

        // A dump writer holds the catalog read-only; wait it out rather than
        // block inside a table lock.
        while catalog.is_read_only() && !should_stop.load(Ordering::Acquire) {
            thread::sleep(READ_ONLY_POLL);
        }

        if let Err(e) = apply_event(&catalog, &event) {
            error!(
                event = "apply_error",
                table = event.table(),
                kind = event.type_name(),
                error = %e,
                "event failed to apply"
            );
        } else {
            cache.invalidate_table(event.table());
        }
        stats.applied_events.fetch_add(1, Ordering::Relaxed);
        processed += 1;

        // Advance the applied cursor regardless of per-event outcome.
        if !event.gtid().is_empty() {
            if let Err(e) = applied_gtid.lock().unwrap().add_gtid(event.gtid()) {
                warn!(event = "apply_warning", gtid = event.gtid(), error = %e, "cannot advance applied GTID");
            }
        }

        if let Some(state_file) = &state_file {
            if options.state_write_interval_events > 0 && processed % options.state_write_interval_events == 0 {
                persist_gtid(state_file, &applied_gtid);
            }
        }
    }

    // Final position write on the way out.
    if let Some(state_file) = &state_file {
        persist_gtid(state_file, &applied_gtid);
    }
    info!(event = "apply_worker", state = "stopped", processed);
}

fn persist_gtid(state_file: &GtidStateFile, applied_gtid: &Arc<Mutex<GtidSet>>) {
    let rendered = applied_gtid.lock().unwrap().to_string();
    if rendered.is_empty() {
        return;
    }
    if let Err(e) = state_file.write(&rendered) {
        warn!(event = "apply_warning", error = %e, "applied-GTID state write failed");
    }
}

/// Applies one accepted event to its table under the write lock.
fn apply_event(catalog: &TableCatalog, event: &BinlogEvent) -> CResult<()> {
    let Some(table_ctx) = catalog.get(event.table()) else {
        // Routed to a table the catalog does not know; nothing to mutate.
        warn!(event = "apply_warning", table = event.table(), "event for unknown table skipped");
        return Ok(());
    };

    match event {
        BinlogEvent::Insert {
            primary_key,
            text,
            filters,
            ..
        } => {
            let mut state = table_ctx.write();
            let doc_id = state.docs.add_document(primary_key, filters.clone())?;
            state.index.add_document(doc_id, text);
            debug!(event = "apply", action = "insert", pk = %primary_key, doc_id);
        }
        BinlogEvent::Update {
            primary_key,
            new_text,
            old_text,
            filters,
            ..
        } => {
            let mut state = table_ctx.write();
            let Some(doc_id) = state.docs.get_doc_id(primary_key) else {
                warn!(event = "apply_warning", action = "update", pk = %primary_key, "document not found, skipping");
                return Ok(());
            };
            state.docs.update_document(doc_id, filters.clone());
            state.index.remove_document(doc_id, old_text);
            state.index.add_document(doc_id, new_text);
            debug!(event = "apply", action = "update", pk = %primary_key, doc_id);
        }
        BinlogEvent::Delete { primary_key, text, .. } => {
            let mut state = table_ctx.write();
            let Some(doc_id) = state.docs.get_doc_id(primary_key) else {
                debug!(event = "apply", action = "delete_absent", pk = %primary_key);
                return Ok(());
            };
            if !text.is_empty() {
                state.index.remove_document(doc_id, text);
            }
            state.docs.remove_document(doc_id);
            debug!(event = "apply", action = "delete", pk = %primary_key, doc_id);
        }
        BinlogEvent::Ddl { table, sql_upper, .. } => {
            match classify_ddl(sql_upper, table).map(|(op, _)| op) {
                Some(DdlOp::Truncate) => {
                    let mut state = table_ctx.write();
                    state.index.clear();
                    state.docs.clear();
                    warn!(event = "apply", action = "truncate", table = %table, "index and document store cleared");
                }
                Some(DdlOp::Drop) => {
                    let mut state = table_ctx.write();
                    state.index.clear();
                    state.docs.clear();
                    error!(
                        event = "apply",
                        action = "drop",
                        table = %table,
                        "table dropped upstream; index and document store cleared"
                    );
                }
                Some(DdlOp::Alter) => {
                    warn!(
                        event = "apply",
                        action = "alter",
                        table = %table,
                        sql = %sql_upper,
                        "schema changed upstream; rebuild if the text column or primary key changed"
                    );
                }
                None => {
                    warn!(event = "apply_warning", table = %table, sql = %sql_upper, "unrecognised DDL ignored");
                }
            }
        }
    }

    table_ctx.touch(time_util::epoch_seconds());
    Ok(())
}
