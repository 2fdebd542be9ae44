pub mod reader;

pub use reader::{ReaderOptions, ReplicationReader};
