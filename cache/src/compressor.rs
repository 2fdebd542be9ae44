use lz4_flex::block::DecompressError;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use common::err::{CResult, Error};
use common::value::DocId;

/// LZ4 framing of a DocId result list. DocId runs from intersections are
/// repetitive enough that this usually more than halves the footprint.
pub struct ResultCompressor;

impl ResultCompressor {
    pub fn compress(doc_ids: &[DocId]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(doc_ids.len() * 4);
        for doc_id in doc_ids {
            raw.extend_from_slice(&doc_id.to_le_bytes());
        }
        compress_prepend_size(&raw)
    }

    /// `expected_count` is the stored uncompressed element count; a mismatch
    /// means the entry bytes do not belong to the key.
    pub fn decompress(compressed: &[u8], expected_count: usize) -> CResult<Vec<DocId>> {
        let raw = decompress_size_prepended(compressed)
            .map_err(|e: DecompressError| Error::Corrupt(format!("cache entry decompression failed: {}", e)))?;
        if raw.len() % 4 != 0 || raw.len() / 4 != expected_count {
            return Err(Error::Corrupt(format!(
                "cache entry holds {} bytes, expected {} doc ids",
                raw.len(),
                expected_count
            )));
        }
        let mut doc_ids = Vec::with_capacity(expected_count);
        for chunk in raw.chunks_exact(4) {
            doc_ids.push(DocId::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(doc_ids)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let doc_ids: Vec<DocId> = (1..=1000).collect();
        let compressed = ResultCompressor::compress(&doc_ids);
        assert!(compressed.len() < doc_ids.len() * 4);
        assert_eq!(ResultCompressor::decompress(&compressed, doc_ids.len()).unwrap(), doc_ids);
    }

    #[test]
    fn empty_round_trip() {
        let compressed = ResultCompressor::compress(&[]);
        assert_eq!(ResultCompressor::decompress(&compressed, 0).unwrap(), Vec::<DocId>::new());
    }

    #[test]
    fn count_mismatch_is_corruption() {
        let compressed = ResultCompressor::compress(&[1, 2, 3]);
        assert!(ResultCompressor::decompress(&compressed, 2).is_err());
    }

    #[test]
    fn garbage_is_corruption() {
        assert!(ResultCompressor::decompress(&[0xFF, 0x01, 0x02], 1).is_err());
    }
}
