pub mod authenticate_command;
pub mod dump_binlog_gtid_command;
pub mod query_command;

pub use authenticate_command::AuthenticateCommand;
pub use dump_binlog_gtid_command::DumpBinlogGtidCommand;
pub use query_command::QueryCommand;
