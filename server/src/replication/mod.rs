pub mod apply;

pub use apply::{ApplyOptions, ApplyWorker};
