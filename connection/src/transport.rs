use common::err::CResult;

/// Wire boundary between the replication core and the upstream database.
///
/// The fetch loop drives this and nothing else; everything past it works on
/// decoded events, so tests substitute a scripted implementation and the
/// MySQL client code stays in one adapter.
pub trait BinlogTransport: Send {
    /// Establishes the dedicated subscription connection.
    fn connect(&mut self) -> CResult<()>;

    /// Fails unless the upstream reports `gtid_mode = ON`.
    fn verify_gtid_mode(&mut self) -> CResult<()>;

    /// Disables server-side event checksums for this connection. The event
    /// layout still reserves the trailing four bytes.
    fn disable_checksum(&mut self) -> CResult<()>;

    /// Opens the binlog stream from the given GTID set.
    fn subscribe(&mut self, server_id: u32, gtid_set: &str) -> CResult<()>;

    /// Blocks for the next framed event buffer (status byte included).
    /// `Ok(None)` is a clean end of stream.
    fn fetch_event(&mut self) -> CResult<Option<Vec<u8>>>;

    /// Tears the connection down. Safe to call repeatedly.
    fn close(&mut self);
}
