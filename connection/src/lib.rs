pub mod bytes;
pub mod commands;
pub mod mysql_transport;
pub mod packet;
pub mod replication;
pub mod transport;

pub use mysql_transport::MysqlTransport;
pub use transport::BinlogTransport;

/// 3-byte length + 1-byte sequence number.
pub const PACKET_HEADER_SIZE: usize = 4;
