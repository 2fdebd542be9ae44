use std::collections::HashMap;

use tracing::warn;

use crate::metadata::TableMetadata;

/// Outcome of feeding a TABLE_MAP into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataUpdate {
    Added,
    Updated,
    SchemaChanged,
}

/// Schema seen per `table_id`. Touched only by the replication fetch loop,
/// so it needs no internal locking; it outlives reconnects.
#[derive(Debug, Default)]
pub struct TableMetadataCache {
    tables: HashMap<u64, TableMetadata>,
}

impl TableMetadataCache {
    pub fn new() -> Self {
        TableMetadataCache {
            tables: HashMap::new(),
        }
    }

    pub fn add_or_update(&mut self, metadata: TableMetadata) -> MetadataUpdate {
        let table_id = metadata.table_id;
        match self.tables.get(&table_id) {
            None => {
                self.tables.insert(table_id, metadata);
                MetadataUpdate::Added
            }
            Some(existing) => {
                let update = if existing.same_schema(&metadata) {
                    MetadataUpdate::Updated
                } else {
                    warn!(
                        event = "table_metadata_schema_changed",
                        table_id,
                        table = %metadata.table_name,
                        "schema drift detected for replicated table"
                    );
                    MetadataUpdate::SchemaChanged
                };
                self.tables.insert(table_id, metadata);
                update
            }
        }
    }

    pub fn get(&self, table_id: u64) -> Option<&TableMetadata> {
        self.tables.get(&table_id)
    }

    pub fn remove(&mut self, table_id: u64) -> bool {
        self.tables.remove(&table_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::column::ColumnType;
    use crate::metadata::ColumnMetadata;

    fn metadata(table_id: u64, column_count: usize) -> TableMetadata {
        TableMetadata {
            table_id,
            database_name: "app".into(),
            table_name: "articles".into(),
            columns: (0..column_count)
                .map(|i| ColumnMetadata {
                    column_type: ColumnType::Long,
                    metadata: 0,
                    nullable: false,
                    unsigned: false,
                    name: format!("col_{}", i),
                })
                .collect(),
        }
    }

    #[test]
    fn add_update_and_drift() {
        let mut cache = TableMetadataCache::new();
        assert_eq!(cache.add_or_update(metadata(7, 2)), MetadataUpdate::Added);
        assert_eq!(cache.add_or_update(metadata(7, 2)), MetadataUpdate::Updated);
        assert_eq!(cache.add_or_update(metadata(7, 3)), MetadataUpdate::SchemaChanged);
        // Drifted schema replaces the cached one.
        assert_eq!(cache.get(7).unwrap().columns.len(), 3);
    }

    #[test]
    fn explicit_removal() {
        let mut cache = TableMetadataCache::new();
        cache.add_or_update(metadata(7, 2));
        assert!(cache.remove(7));
        assert!(!cache.remove(7));
        assert!(cache.get(7).is_none());
    }
}
