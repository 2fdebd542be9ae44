use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::debug;

use common::config::ServerConfig;

use crate::dispatcher::RequestDispatcher;
use crate::handlers::ConnectionContext;
use crate::response::ResponseFormatter;

/// Serves one client connection: reads CRLF-terminated request lines, feeds
/// them to the dispatcher, writes responses.
///
/// A parse error answers `ERROR ...` and keeps the connection; a request
/// that overruns the line cap without a newline answers and closes.
pub fn serve_connection(mut stream: TcpStream, dispatcher: &RequestDispatcher, config: &ServerConfig) {
    if config.recv_timeout > 0 {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(config.recv_timeout)));
    }
    if config.send_timeout > 0 {
        let _ = stream.set_write_timeout(Some(Duration::from_secs(config.send_timeout)));
    }

    let mut conn = ConnectionContext::default();
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = vec![0u8; config.recv_buffer_size.max(512)];

    loop {
        // Drain complete lines already buffered.
        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let request = line.trim_end_matches(['\r', '\n']).trim();
            if request.is_empty() {
                continue;
            }
            let response = dispatcher.dispatch(request, &mut conn);
            if stream.write_all(response.as_bytes()).is_err() {
                return;
            }
        }

        // An unterminated request beyond the cap closes the connection.
        if config.max_query_length > 0 && buffer.len() > config.max_query_length {
            debug!(event = "connection", action = "oversized_request", bytes = buffer.len());
            let _ = stream.write_all(ResponseFormatter::error("Request too large (no newline detected)").as_bytes());
            return;
        }

        match stream.read(&mut chunk) {
            Ok(0) => return, // peer closed
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(_) => return,
        }
    }
}
