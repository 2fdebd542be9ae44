pub mod acceptor;
pub mod cidr;
pub mod connection_io;

pub use acceptor::ConnectionAcceptor;
