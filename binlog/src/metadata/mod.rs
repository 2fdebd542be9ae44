pub mod table_cache;
pub mod table_metadata;

pub use table_cache::{MetadataUpdate, TableMetadataCache};
pub use table_metadata::{ColumnMetadata, TableMetadata};
