use serde::Serialize;

use crate::column::ColumnType;

/// Per-column schema captured from a TABLE_MAP event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub column_type: ColumnType,
    /// Type-specific metadata: max length, precision/scale, fsp, ...
    pub metadata: u16,
    pub nullable: bool,
    pub unsigned: bool,
    /// TABLE_MAP does not carry column names; positional names are assigned
    /// and later overlaid from configuration where known.
    pub name: String,
}

/// Schema of one replicated table, keyed by the upstream's `table_id`.
///
/// Lives only in process memory; the upstream re-sends a TABLE_MAP before
/// every run of row events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMetadata {
    pub table_id: u64,
    pub database_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Schema equality for drift detection: column count plus per-column
    /// type, metadata and name.
    pub fn same_schema(&self, other: &TableMetadata) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.column_type == b.column_type && a.metadata == b.metadata && a.name == b.name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn column(name: &str, column_type: ColumnType) -> ColumnMetadata {
        ColumnMetadata {
            column_type,
            metadata: 0,
            nullable: false,
            unsigned: false,
            name: name.to_string(),
        }
    }

    #[test]
    fn schema_comparison() {
        let a = TableMetadata {
            table_id: 1,
            database_name: "app".into(),
            table_name: "articles".into(),
            columns: vec![column("id", ColumnType::Long), column("content", ColumnType::Blob)],
        };
        let mut b = a.clone();
        b.table_id = 2;
        assert!(a.same_schema(&b));

        b.columns[1] = column("content", ColumnType::Varchar);
        assert!(!a.same_schema(&b));

        b.columns = vec![column("id", ColumnType::Long)];
        assert!(!a.same_schema(&b));
    }
}
