use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use common::err::{CResult, Error};
use common::value::DocId;

use crate::posting_list::{intersect_sorted, subtract_sorted, PostingList};
use crate::tokenizer;

/// Inverted n-gram index for one table.
///
/// Mutated only by the replication apply worker; search handlers and the dump
/// writer read it through the catalog's read view. A live document appears in
/// at least one posting list iff its indexed text is non-empty.
#[derive(Debug, Default)]
pub struct NGramIndex {
    postings: HashMap<String, PostingList>,
    ngram_size: usize,
    kanji_ngram_size: usize,
}

impl NGramIndex {
    pub fn new(ngram_size: usize, kanji_ngram_size: usize) -> Self {
        NGramIndex {
            postings: HashMap::new(),
            ngram_size,
            kanji_ngram_size,
        }
    }

    pub fn ngram_size(&self) -> usize {
        self.ngram_size
    }

    pub fn kanji_ngram_size(&self) -> usize {
        self.kanji_ngram_size
    }

    /// Grams for raw text under this index's configuration.
    pub fn grams(&self, text: &str) -> Vec<String> {
        tokenizer::grams_for(text, self.ngram_size, self.kanji_ngram_size)
    }

    pub fn add_document(&mut self, doc_id: DocId, text: &str) {
        for gram in self.grams(text) {
            self.postings.entry(gram).or_default().insert(doc_id);
        }
    }

    /// Removal is driven by the text the document was indexed with; empty
    /// posting lists are dropped so term_count stays meaningful.
    pub fn remove_document(&mut self, doc_id: DocId, text: &str) {
        for gram in self.grams(text) {
            if let Some(list) = self.postings.get_mut(&gram) {
                list.remove(doc_id);
                if list.is_empty() {
                    self.postings.remove(&gram);
                }
            }
        }
    }

    pub fn get_posting_list(&self, gram: &str) -> Option<&PostingList> {
        self.postings.get(gram)
    }

    /// Ascending DocIds containing every gram. An unknown gram short-circuits
    /// to empty.
    pub fn search_and(&self, grams: &[String]) -> Vec<DocId> {
        if grams.is_empty() {
            return Vec::new();
        }
        let mut lists: Vec<&PostingList> = Vec::with_capacity(grams.len());
        for gram in grams {
            match self.postings.get(gram) {
                Some(list) => lists.push(list),
                None => return Vec::new(),
            }
        }
        // Smallest list first keeps the running intersection minimal.
        lists.sort_by_key(|list| list.size());
        let mut result = lists[0].doc_ids().to_vec();
        for list in &lists[1..] {
            if result.is_empty() {
                break;
            }
            result = intersect_sorted(&result, list.doc_ids());
        }
        result
    }

    /// At most `k` matching DocIds from the id-order extremes; descending
    /// when `reverse`. With several grams this intersects first and trims,
    /// with one gram it reads straight off the posting list.
    pub fn search_and_top_k(&self, grams: &[String], k: usize, reverse: bool) -> Vec<DocId> {
        if grams.len() == 1 {
            return match self.postings.get(&grams[0]) {
                Some(list) => list.top_k(k, reverse),
                None => Vec::new(),
            };
        }
        let mut full = self.search_and(grams);
        if reverse {
            full.reverse();
        }
        full.truncate(k);
        full
    }

    /// Ascending DocIds containing any gram, for NOT-term subtraction.
    pub fn search_or(&self, grams: &[String]) -> Vec<DocId> {
        let mut merged: Vec<DocId> = Vec::new();
        for gram in grams {
            if let Some(list) = self.postings.get(gram) {
                merged.extend_from_slice(list.doc_ids());
            }
        }
        merged.sort_unstable();
        merged.dedup();
        merged
    }

    /// `candidates` minus documents matching the grams, both ascending.
    pub fn subtract(&self, candidates: &[DocId], grams: &[String]) -> Vec<DocId> {
        let excluded = self.search_and(grams);
        subtract_sorted(candidates, &excluded)
    }

    pub fn clear(&mut self) {
        self.postings.clear();
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Rough heap footprint, reported by INFO and dump statistics.
    pub fn memory_usage(&self) -> usize {
        self.postings
            .iter()
            .map(|(gram, list)| gram.len() + list.size() * std::mem::size_of::<DocId>() + 48)
            .sum()
    }

    /// Dump payload: LE u64 term count, then per term a u32-length-prefixed
    /// gram and a u32-count-prefixed ascending DocId list.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut terms: Vec<(&String, &PostingList)> = self.postings.iter().collect();
        terms.sort_by(|a, b| a.0.cmp(b.0));

        buffer.write_u64::<LittleEndian>(terms.len() as u64).unwrap();
        for (gram, list) in terms {
            buffer.write_u32::<LittleEndian>(gram.len() as u32).unwrap();
            buffer.write_all(gram.as_bytes()).unwrap();
            buffer.write_u32::<LittleEndian>(list.size() as u32).unwrap();
            for &doc_id in list.doc_ids() {
                buffer.write_u32::<LittleEndian>(doc_id).unwrap();
            }
        }
        buffer
    }

    /// Replaces this index's postings from a dump payload.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> CResult<()> {
        let mut cursor = Cursor::new(bytes);
        let term_count = cursor.read_u64::<LittleEndian>()?;

        let mut postings = HashMap::with_capacity(term_count as usize);
        for _ in 0..term_count {
            let gram_len = cursor.read_u32::<LittleEndian>()? as usize;
            let mut gram_bytes = vec![0u8; gram_len];
            cursor.read_exact(&mut gram_bytes)?;
            let gram = String::from_utf8(gram_bytes)
                .map_err(|_| Error::Corrupt("index payload holds non-UTF-8 term".to_string()))?;

            let doc_count = cursor.read_u32::<LittleEndian>()? as usize;
            let mut doc_ids = Vec::with_capacity(doc_count);
            let mut prev: Option<DocId> = None;
            for _ in 0..doc_count {
                let doc_id = cursor.read_u32::<LittleEndian>()?;
                if let Some(p) = prev {
                    if doc_id <= p {
                        return Err(Error::Corrupt(format!(
                            "index payload posting list for '{}' is not ascending",
                            gram
                        )));
                    }
                }
                prev = Some(doc_id);
                doc_ids.push(doc_id);
            }
            postings.insert(gram, PostingList::from_sorted(doc_ids));
        }

        self.postings = postings;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn index_with(docs: &[(DocId, &str)]) -> NGramIndex {
        let mut index = NGramIndex::new(2, 0);
        for (doc_id, text) in docs {
            index.add_document(*doc_id, text);
        }
        index
    }

    #[test]
    fn add_then_search() {
        let index = index_with(&[(1, "hello world"), (2, "hello rust"), (3, "goodbye")]);
        let grams = index.grams("hello");
        let hits = index.search_and(&grams);
        assert_eq!(hits, vec![1, 2]);

        let none = index.search_and(&index.grams("zzzz"));
        assert!(none.is_empty());
    }

    #[test]
    fn remove_updates_postings() {
        let mut index = index_with(&[(1, "hello world"), (2, "hello rust")]);
        index.remove_document(1, "hello world");
        assert_eq!(index.search_and(&index.grams("hello")), vec![2]);
        // Grams unique to doc 1 are gone entirely.
        assert!(index.get_posting_list("wo").is_none());
    }

    #[test]
    fn empty_text_indexes_nothing() {
        let mut index = NGramIndex::new(2, 0);
        index.add_document(7, "");
        assert_eq!(index.term_count(), 0);
    }

    #[test]
    fn top_k_single_gram_reads_extremes() {
        let mut index = NGramIndex::new(2, 0);
        for doc_id in 1..=10 {
            index.add_document(doc_id, "ab");
        }
        assert_eq!(index.search_and_top_k(&["ab".to_string()], 3, true), vec![10, 9, 8]);
        assert_eq!(index.search_and_top_k(&["ab".to_string()], 3, false), vec![1, 2, 3]);
    }

    #[test]
    fn subtract_not_terms() {
        let index = index_with(&[(1, "hello world"), (2, "hello rust"), (3, "hello world rust")]);
        let candidates = index.search_and(&index.grams("hello"));
        let filtered = index.subtract(&candidates, &index.grams("rust"));
        assert_eq!(filtered, vec![1]);
    }

    #[test]
    fn payload_round_trip() {
        let index = index_with(&[(1, "hello world"), (2, "hello rust"), (9, "漢字テスト")]);
        let bytes = index.to_bytes();

        let mut restored = NGramIndex::new(2, 0);
        restored.load_bytes(&bytes).unwrap();

        assert_eq!(restored.term_count(), index.term_count());
        assert_eq!(
            restored.search_and(&index.grams("hello")),
            index.search_and(&index.grams("hello"))
        );
    }

    #[test]
    fn corrupt_payload_rejected() {
        let index = index_with(&[(1, "hello")]);
        let mut bytes = index.to_bytes();
        bytes.truncate(bytes.len() - 2);

        let mut restored = NGramIndex::new(2, 0);
        assert!(restored.load_bytes(&bytes).is_err());
    }
}
