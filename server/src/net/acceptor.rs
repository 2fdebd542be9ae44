use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use common::err::{CResult, Error};
use common::structure::queue::BoundedQueue;

use crate::dispatcher::RequestDispatcher;
use crate::net::cidr;
use crate::net::connection_io::serve_connection;

/// Accept-loop poll interval for the stop flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// TCP front end: one accept thread feeding a bounded worker pool, one
/// connection served per worker at a time.
pub struct ConnectionAcceptor {
    should_stop: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    queue: Arc<BoundedQueue<TcpStream>>,
    local_addr: std::net::SocketAddr,
}

impl ConnectionAcceptor {
    pub fn start(dispatcher: Arc<RequestDispatcher>) -> CResult<ConnectionAcceptor> {
        let config = Arc::clone(&dispatcher.ctx().config);
        let bind_address = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&bind_address)
            .map_err(|e| Error::Unavailable(format!("cannot bind {}: {}", bind_address, e)))?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        info!(event = "server", action = "listening", address = %local_addr);

        let should_stop = Arc::new(AtomicBool::new(false));
        let queue: Arc<BoundedQueue<TcpStream>> =
            Arc::new(BoundedQueue::with_capacity(config.server.max_connections.max(1)));

        // Worker pool: each worker serves one connection at a time.
        let mut worker_handles = Vec::new();
        for worker_id in 0..config.server.worker_threads.max(1) {
            let queue = Arc::clone(&queue);
            let dispatcher = Arc::clone(&dispatcher);
            let config = Arc::clone(&config);
            let handle = thread::Builder::new()
                .name(format!("conn-worker-{}", worker_id))
                .spawn(move || {
                    while let Some(stream) = queue.pop() {
                        let stats = &dispatcher.ctx().stats;
                        stats.active_connections.fetch_add(1, Ordering::Relaxed);
                        serve_connection(stream, &dispatcher, &config.server);
                        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
                    }
                })
                .map_err(|e| Error::Internal(format!("cannot spawn connection worker: {}", e)))?;
            worker_handles.push(handle);
        }

        // Accept loop.
        let accept_stop = Arc::clone(&should_stop);
        let accept_queue = Arc::clone(&queue);
        let accept_dispatcher = Arc::clone(&dispatcher);
        let accept_handle = thread::Builder::new()
            .name("conn-acceptor".to_string())
            .spawn(move || {
                accept_loop(listener, accept_queue, accept_dispatcher, accept_stop);
            })
            .map_err(|e| Error::Internal(format!("cannot spawn acceptor: {}", e)))?;

        Ok(ConnectionAcceptor {
            should_stop,
            accept_handle: Some(accept_handle),
            worker_handles,
            queue,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        self.queue.close();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ConnectionAcceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    queue: Arc<BoundedQueue<TcpStream>>,
    dispatcher: Arc<RequestDispatcher>,
    should_stop: Arc<AtomicBool>,
) {
    let ctx = dispatcher.ctx();
    while !should_stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if !cidr::is_allowed(peer.ip(), &ctx.config.server.allow_cidrs) {
                    warn!(event = "server", action = "connection_refused", peer = %peer, "address not in allow list");
                    ctx.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                ctx.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                // Blocking IO in the worker, non-blocking only for accept.
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                if queue.push(stream).is_err() {
                    return; // queue closed under shutdown
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(event = "server", action = "accept_error", error = %e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}
