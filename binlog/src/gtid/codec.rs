use byteorder::{LittleEndian, WriteBytesExt};
use uuid::Uuid;

use common::err::{CResult, Error};

use crate::gtid::GtidSet;

/// Translates between the canonical GTID-set string and the binary layout
/// the subscription command carries.
pub struct GtidCodec;

impl GtidCodec {
    /// Canonical string ⇒ wire bytes: LE u64 sid count, then per sid the raw
    /// 16 UUID bytes, LE u64 interval count and LE u64 start/end_exclusive
    /// pairs. The empty set encodes as eight zero bytes.
    pub fn encode(gtid_set: &str) -> CResult<Vec<u8>> {
        if gtid_set.trim().is_empty() {
            return Ok(vec![0u8; 8]);
        }

        let parsed = GtidSet::parse(gtid_set)?;

        let mut out = Vec::new();
        out.write_u64::<LittleEndian>(parsed.uuid_sets().len() as u64)
            .expect("vec write");
        for set in parsed.uuid_sets().values() {
            let uuid = Uuid::parse_str(set.source_id())
                .map_err(|_| Error::InvalidInput(format!("invalid UUID: {}", set.source_id())))?;
            out.extend_from_slice(uuid.as_bytes());

            out.write_u64::<LittleEndian>(set.intervals().len() as u64)
                .expect("vec write");
            for interval in set.intervals() {
                out.write_u64::<LittleEndian>(interval.start()).expect("vec write");
                out.write_u64::<LittleEndian>(interval.end()).expect("vec write");
            }
        }
        Ok(out)
    }

    /// The UUID + GNO of a GTID event ⇒ `uuid:gno` with the UUID grouped
    /// 8-4-4-4-12 in lowercase hex.
    pub fn format_gtid(uuid_bytes: &[u8; 16], gno: u64) -> String {
        format!("{}:{}", Uuid::from_bytes(*uuid_bytes).hyphenated(), gno)
    }
}
