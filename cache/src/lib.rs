pub mod compressor;
pub mod manager;
pub mod normalizer;
pub mod query_cache;

pub use manager::{CacheManager, CachedLookup};
pub use normalizer::QueryNormalizer;
pub use query_cache::{CacheKey, CacheStatsSnapshot, MissKind, QueryCache};
