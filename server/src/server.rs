use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use binlog::decoder::EventDecoder;
use binlog::events::BinlogEvent;
use binlog::gtid::GtidSet;
use cache::CacheManager;
use common::config::Config;
use common::err::{CResult, Error};
use common::structure::queue::BoundedQueue;
use common::time_util;
use connection::replication::{ReaderOptions, ReplicationReader};
use connection::{BinlogTransport, MysqlTransport};
use storage::GtidStateFile;

use crate::catalog::TableCatalog;
use crate::dispatcher::RequestDispatcher;
use crate::handlers::HandlerContext;
use crate::net::ConnectionAcceptor;
use crate::replication::{ApplyOptions, ApplyWorker};

/// The assembled server: catalog, cache, dispatcher, replication pipeline
/// and TCP front end, wired per the loaded configuration.
pub struct MygramServer {
    ctx: HandlerContext,
    dispatcher: Arc<RequestDispatcher>,
    acceptor: Option<ConnectionAcceptor>,
    reader: Option<ReplicationReader>,
    apply_worker: Option<ApplyWorker>,
    queue: Arc<BoundedQueue<BinlogEvent>>,
}

impl MygramServer {
    pub fn new(config: Config) -> CResult<MygramServer> {
        config.validate()?;

        let catalog = TableCatalog::from_configs(&config.tables);
        let cache = CacheManager::new(&config.cache);
        let queue = Arc::new(BoundedQueue::with_capacity(config.replication.queue_size));
        let ctx = HandlerContext::new(config, catalog, cache);
        let dispatcher = Arc::new(RequestDispatcher::new(ctx.clone()));

        Ok(MygramServer {
            ctx,
            dispatcher,
            acceptor: None,
            reader: None,
            apply_worker: None,
            queue,
        })
    }

    pub fn ctx(&self) -> &HandlerContext {
        &self.ctx
    }

    /// Resolves the GTID set replication starts from: the state file wins
    /// over the configured `start_gtid`.
    fn resolve_start_gtid(&self) -> CResult<String> {
        let replication = &self.ctx.config.replication;
        if !replication.state_file_path.is_empty() {
            let state_file = GtidStateFile::new(&replication.state_file_path);
            if let Some(stored) = state_file.read()? {
                info!(event = "server", action = "resume_from_state_file", gtid = %stored);
                return Ok(stored);
            }
        }
        Ok(replication.start_gtid.clone())
    }

    /// Starts the apply worker, the replication reader (when enabled) and
    /// the TCP acceptor.
    pub fn start(&mut self) -> CResult<()> {
        let config = Arc::clone(&self.ctx.config);

        let start_gtid = self.resolve_start_gtid()?;
        *self.ctx.applied_gtid.lock().unwrap() = GtidSet::parse(&start_gtid)?;

        if config.replication.enable {
            let apply_worker = ApplyWorker::start(
                Arc::clone(&self.queue),
                Arc::clone(&self.ctx.catalog),
                Arc::clone(&self.ctx.cache),
                Arc::clone(&self.ctx.stats),
                Arc::clone(&self.ctx.applied_gtid),
                ApplyOptions {
                    state_write_interval_events: config.replication.state_write_interval_events,
                    state_file: (!config.replication.state_file_path.is_empty())
                        .then(|| config.replication.state_file_path.clone()),
                },
            )?;
            self.apply_worker = Some(apply_worker);

            let zone = time_util::parse_zone_offset(&config.mysql.datetime_timezone)?;
            let decoder = EventDecoder::new(config.tables.clone(), zone);
            let transport: Box<dyn BinlogTransport> = Box::new(MysqlTransport::new(config.mysql.clone()));
            let reader = ReplicationReader::start(
                transport,
                decoder,
                Arc::clone(&self.queue),
                ReaderOptions {
                    server_id: config.replication.server_id,
                    start_gtid,
                    reconnect_delay_ms: config.replication.reconnect_delay_ms,
                },
                Arc::clone(&self.ctx.current_gtid),
            )?;
            self.reader = Some(reader);
        } else {
            info!(event = "server", action = "replication_disabled");
        }

        self.acceptor = Some(ConnectionAcceptor::start(Arc::clone(&self.dispatcher))?);
        Ok(())
    }

    /// Loads a dump before serving, typically at cold start. Fails hard so
    /// the process can exit non-zero when no fallback is configured.
    pub fn load_dump(&self, path: &str) -> CResult<()> {
        let query = {
            let mut query = common::query::Query::new(common::query::QueryType::DumpLoad);
            query.path = path.to_string();
            query
        };
        let response = crate::handlers::dump_handler::DumpHandler::handle(&self.ctx, &query);
        if response.starts_with("ERROR") {
            return Err(Error::Corrupt(response.trim_end().to_string()));
        }
        Ok(())
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.acceptor.as_ref().map(|acceptor| acceptor.local_addr())
    }

    /// Orderly shutdown: stop accepting, stop fetching, drain and stop the
    /// apply worker (which persists the final applied GTID), stop the cache
    /// worker.
    pub fn stop(&mut self) {
        info!(event = "server", action = "stopping");
        if let Some(mut acceptor) = self.acceptor.take() {
            acceptor.stop();
        }
        if let Some(mut reader) = self.reader.take() {
            reader.stop();
        }
        self.queue.close();
        if let Some(mut apply_worker) = self.apply_worker.take() {
            apply_worker.stop();
        }
        self.ctx.cache.stop();
        info!(event = "server", action = "stopped");
    }

    /// Exposes the shared current-GTID cell so the reader's cursor shows up
    /// in INFO.
    pub fn current_gtid_cell(&self) -> Arc<Mutex<String>> {
        Arc::clone(&self.ctx.current_gtid)
    }
}

impl Drop for MygramServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;

    use common::config::{TableConfig, TextSourceConfig};

    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.server.port = 0; // ephemeral
        config.tables.push(TableConfig {
            name: "articles".to_string(),
            primary_key: "id".to_string(),
            text_source: TextSourceConfig {
                column: "content".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        config
    }

    #[test]
    fn serves_over_tcp_and_stops_cleanly() {
        let mut server = MygramServer::new(test_config()).unwrap();
        server.start().unwrap();
        let address = server.local_addr().unwrap();

        let mut stream = TcpStream::connect(address).unwrap();
        stream.write_all(b"INFO\r\n").unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "+OK\r\n");

        server.stop();
    }

    #[test]
    fn invalid_config_refused() {
        let config = Config::default(); // no tables
        assert!(MygramServer::new(config).is_err());
    }
}
