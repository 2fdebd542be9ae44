use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use common::err::{CResult, Error};
use common::value::{DocId, FilterMap, FilterValue, RESERVED_DOC_ID};

/// One mirrored row: its upstream primary key, the dense DocId assigned at
/// first insert, and the bound filter columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub primary_key: String,
    pub doc_id: DocId,
    pub filters: FilterMap,
}

/// Owner of every document of one table.
///
/// DocIds are assigned monotonically starting at 1 (`0` is reserved) and are
/// stable for a document's lifetime; removal does not recycle them. Mutated
/// only by the apply worker.
#[derive(Debug, Default)]
pub struct DocumentStore {
    by_primary_key: HashMap<String, DocId>,
    documents: HashMap<DocId, Document>,
    next_doc_id: DocId,
}

impl DocumentStore {
    pub fn new() -> Self {
        DocumentStore {
            by_primary_key: HashMap::new(),
            documents: HashMap::new(),
            next_doc_id: RESERVED_DOC_ID + 1,
        }
    }

    /// Binds a new document, or refreshes the filters when the primary key
    /// is already present (an INSERT replayed across a resume).
    pub fn add_document(&mut self, primary_key: &str, filters: FilterMap) -> CResult<DocId> {
        if let Some(&doc_id) = self.by_primary_key.get(primary_key) {
            if let Some(doc) = self.documents.get_mut(&doc_id) {
                doc.filters = filters;
            }
            return Ok(doc_id);
        }
        if self.next_doc_id == DocId::MAX {
            return Err(Error::Exhausted("DocId space exhausted".to_string()));
        }
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;
        self.by_primary_key.insert(primary_key.to_string(), doc_id);
        self.documents.insert(
            doc_id,
            Document {
                primary_key: primary_key.to_string(),
                doc_id,
                filters,
            },
        );
        Ok(doc_id)
    }

    pub fn get_doc_id(&self, primary_key: &str) -> Option<DocId> {
        self.by_primary_key.get(primary_key).copied()
    }

    pub fn get(&self, doc_id: DocId) -> Option<&Document> {
        self.documents.get(&doc_id)
    }

    pub fn get_by_primary_key(&self, primary_key: &str) -> Option<&Document> {
        self.get_doc_id(primary_key).and_then(|doc_id| self.get(doc_id))
    }

    pub fn update_document(&mut self, doc_id: DocId, filters: FilterMap) -> bool {
        match self.documents.get_mut(&doc_id) {
            Some(doc) => {
                doc.filters = filters;
                true
            }
            None => false,
        }
    }

    pub fn remove_document(&mut self, doc_id: DocId) -> Option<Document> {
        let doc = self.documents.remove(&doc_id)?;
        self.by_primary_key.remove(&doc.primary_key);
        Some(doc)
    }

    pub fn clear(&mut self) {
        self.by_primary_key.clear();
        self.documents.clear();
        self.next_doc_id = RESERVED_DOC_ID + 1;
    }

    pub fn doc_count(&self) -> usize {
        self.documents.len()
    }

    pub fn next_doc_id(&self) -> DocId {
        self.next_doc_id
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Rough heap footprint, reported by INFO and dump statistics.
    pub fn memory_usage(&self) -> usize {
        self.documents
            .values()
            .map(|doc| {
                doc.primary_key.len() * 2
                    + doc
                        .filters
                        .iter()
                        .map(|(name, value)| {
                            name.len()
                                + match value {
                                    FilterValue::Str(s) => s.len() + 16,
                                    _ => 16,
                                }
                        })
                        .sum::<usize>()
                    + 96
            })
            .sum()
    }

    /// Dump payload: LE u32 next_doc_id, u64 document count, then per
    /// document the doc_id, length-prefixed primary key and tagged filters.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.write_u32::<LittleEndian>(self.next_doc_id).unwrap();
        buffer.write_u64::<LittleEndian>(self.documents.len() as u64).unwrap();

        let mut doc_ids: Vec<&DocId> = self.documents.keys().collect();
        doc_ids.sort();
        for doc_id in doc_ids {
            let doc = &self.documents[doc_id];
            buffer.write_u32::<LittleEndian>(doc.doc_id).unwrap();
            write_string(&mut buffer, &doc.primary_key);
            buffer.write_u32::<LittleEndian>(doc.filters.len() as u32).unwrap();
            for (name, value) in &doc.filters {
                write_string(&mut buffer, name);
                write_filter_value(&mut buffer, value);
            }
        }
        buffer
    }

    /// Replaces this store's contents from a dump payload.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> CResult<()> {
        let mut cursor = Cursor::new(bytes);
        let next_doc_id = cursor.read_u32::<LittleEndian>()?;
        let doc_count = cursor.read_u64::<LittleEndian>()?;

        let mut by_primary_key = HashMap::with_capacity(doc_count as usize);
        let mut documents = HashMap::with_capacity(doc_count as usize);
        for _ in 0..doc_count {
            let doc_id = cursor.read_u32::<LittleEndian>()?;
            if doc_id == RESERVED_DOC_ID || doc_id >= next_doc_id {
                return Err(Error::Corrupt(format!("doc store payload holds invalid DocId {}", doc_id)));
            }
            let primary_key = read_string(&mut cursor)?;
            let filter_count = cursor.read_u32::<LittleEndian>()?;
            let mut filters = FilterMap::new();
            for _ in 0..filter_count {
                let name = read_string(&mut cursor)?;
                let value = read_filter_value(&mut cursor)?;
                filters.insert(name, value);
            }
            if by_primary_key.insert(primary_key.clone(), doc_id).is_some() {
                return Err(Error::Corrupt(format!(
                    "doc store payload repeats primary key '{}'",
                    primary_key
                )));
            }
            documents.insert(
                doc_id,
                Document {
                    primary_key,
                    doc_id,
                    filters,
                },
            );
        }

        self.by_primary_key = by_primary_key;
        self.documents = documents;
        self.next_doc_id = next_doc_id.max(RESERVED_DOC_ID + 1);
        Ok(())
    }
}

fn write_string(buffer: &mut Vec<u8>, value: &str) {
    buffer.write_u32::<LittleEndian>(value.len() as u32).unwrap();
    buffer.write_all(value.as_bytes()).unwrap();
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> CResult<String> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| Error::Corrupt("doc store payload holds non-UTF-8 string".to_string()))
}

fn write_filter_value(buffer: &mut Vec<u8>, value: &FilterValue) {
    match value {
        FilterValue::Null => buffer.push(0),
        FilterValue::Bool(v) => {
            buffer.push(1);
            buffer.push(u8::from(*v));
        }
        FilterValue::Int(v) => {
            buffer.push(2);
            buffer.write_i64::<LittleEndian>(*v).unwrap();
        }
        FilterValue::UInt(v) => {
            buffer.push(3);
            buffer.write_u64::<LittleEndian>(*v).unwrap();
        }
        FilterValue::Double(v) => {
            buffer.push(4);
            buffer.write_u64::<LittleEndian>(v.to_bits()).unwrap();
        }
        FilterValue::Str(v) => {
            buffer.push(5);
            write_string(buffer, v);
        }
        FilterValue::Time(v) => {
            buffer.push(6);
            buffer.write_i32::<LittleEndian>(*v).unwrap();
        }
        FilterValue::Epoch(v) => {
            buffer.push(7);
            buffer.write_u64::<LittleEndian>(*v).unwrap();
        }
    }
}

fn read_filter_value(cursor: &mut Cursor<&[u8]>) -> CResult<FilterValue> {
    let tag = cursor.read_u8()?;
    Ok(match tag {
        0 => FilterValue::Null,
        1 => FilterValue::Bool(cursor.read_u8()? != 0),
        2 => FilterValue::Int(cursor.read_i64::<LittleEndian>()?),
        3 => FilterValue::UInt(cursor.read_u64::<LittleEndian>()?),
        4 => FilterValue::Double(f64::from_bits(cursor.read_u64::<LittleEndian>()?)),
        5 => FilterValue::Str(read_string(cursor)?),
        6 => FilterValue::Time(cursor.read_i32::<LittleEndian>()?),
        7 => FilterValue::Epoch(cursor.read_u64::<LittleEndian>()?),
        other => {
            return Err(Error::Unsupported(format!("unknown filter value tag {}", other)));
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn filters(status: i64) -> FilterMap {
        let mut map = FilterMap::new();
        map.insert("status".into(), FilterValue::Int(status));
        map
    }

    #[test]
    fn doc_ids_are_dense_and_stable() {
        let mut store = DocumentStore::new();
        let a = store.add_document("100", filters(1)).unwrap();
        let b = store.add_document("200", filters(1)).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        // Re-adding an existing primary key keeps its DocId.
        let again = store.add_document("100", filters(2)).unwrap();
        assert_eq!(again, a);
        assert_eq!(store.get(a).unwrap().filters["status"], FilterValue::Int(2));

        // Removal does not recycle ids.
        store.remove_document(a);
        let c = store.add_document("300", filters(1)).unwrap();
        assert_eq!(c, 3);
        assert_eq!(store.get_doc_id("100"), None);
    }

    #[test]
    fn update_and_remove() {
        let mut store = DocumentStore::new();
        let id = store.add_document("100", filters(1)).unwrap();
        assert!(store.update_document(id, filters(5)));
        assert_eq!(store.get(id).unwrap().filters["status"], FilterValue::Int(5));
        assert!(!store.update_document(999, filters(0)));

        let doc = store.remove_document(id).unwrap();
        assert_eq!(doc.primary_key, "100");
        assert!(store.remove_document(id).is_none());
        assert_eq!(store.doc_count(), 0);
    }

    #[test]
    fn clear_resets_ids() {
        let mut store = DocumentStore::new();
        store.add_document("a", FilterMap::new()).unwrap();
        store.clear();
        assert_eq!(store.add_document("b", FilterMap::new()).unwrap(), 1);
    }

    #[test]
    fn payload_round_trip() {
        let mut store = DocumentStore::new();
        let mut mixed = FilterMap::new();
        mixed.insert("status".into(), FilterValue::Int(-3));
        mixed.insert("views".into(), FilterValue::UInt(42));
        mixed.insert("score".into(), FilterValue::Double(1.25));
        mixed.insert("title".into(), FilterValue::Str("日本語".into()));
        mixed.insert("opens".into(), FilterValue::Time(-3600));
        mixed.insert("created".into(), FilterValue::Epoch(1700000000));
        mixed.insert("flag".into(), FilterValue::Bool(true));
        mixed.insert("missing".into(), FilterValue::Null);
        store.add_document("pk-1", mixed.clone()).unwrap();
        store.add_document("pk-2", FilterMap::new()).unwrap();
        store.remove_document(2);

        let bytes = store.to_bytes();
        let mut restored = DocumentStore::new();
        restored.load_bytes(&bytes).unwrap();

        assert_eq!(restored.doc_count(), 1);
        assert_eq!(restored.next_doc_id(), 3);
        assert_eq!(restored.get_by_primary_key("pk-1").unwrap().filters, mixed);
    }

    #[test]
    fn corrupt_payload_rejected() {
        let mut store = DocumentStore::new();
        store.add_document("pk-1", filters(1)).unwrap();
        let mut bytes = store.to_bytes();
        bytes.truncate(bytes.len() - 3);
        assert!(DocumentStore::new().load_bytes(&bytes).is_err());

        // A doc_id at or beyond next_doc_id is inconsistent.
        let mut bytes = store.to_bytes();
        bytes[0..4].copy_from_slice(&1u32.to_le_bytes());
        assert!(DocumentStore::new().load_bytes(&bytes).is_err());
    }
}
