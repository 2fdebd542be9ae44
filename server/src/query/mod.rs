pub mod debug_info;
pub mod parser;

pub use debug_info::{CacheStatus, DebugInfo};
pub use parser::QueryParser;
