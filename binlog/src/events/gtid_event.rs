use common::err::{CResult, Error};

use crate::events::event_header::{EventHeader, COMMON_HEADER_LEN};
use crate::gtid::GtidCodec;

/// Extracts `uuid:gno` from a GTID event.
///
/// Body after the common header: commit flag (1 byte), SID (16 bytes, the
/// raw UUID), GNO (8 bytes little-endian).
pub fn extract_gtid(event: &[u8]) -> CResult<String> {
    let header = EventHeader::parse(event)?;
    let end = header.parseable_end();
    let body = COMMON_HEADER_LEN + 1; // skip the commit flag

    if body + 24 > end {
        return Err(Error::Corrupt("GTID event too short".to_string()));
    }

    let mut uuid_bytes = [0u8; 16];
    uuid_bytes.copy_from_slice(&event[body..body + 16]);

    let gno_bytes = &event[body + 16..body + 24];
    let gno = crate::utils::uint8korr(gno_bytes);

    Ok(GtidCodec::format_gtid(&uuid_bytes, gno))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::events::EventType;

    #[test]
    fn extracts_uuid_and_gno() {
        let uuid = hex::decode("61d5b289bccc11f0b921cabbb4ee51f6").unwrap();
        let mut body = vec![1u8]; // commit flag
        body.extend_from_slice(&uuid);
        body.extend_from_slice(&42u64.to_le_bytes());

        let event_size = (COMMON_HEADER_LEN + body.len() + 4) as u32;
        let mut event = Vec::new();
        event.extend_from_slice(&0u32.to_le_bytes());
        event.push(EventType::Gtid as u8);
        event.extend_from_slice(&1u32.to_le_bytes());
        event.extend_from_slice(&event_size.to_le_bytes());
        event.extend_from_slice(&0u32.to_le_bytes());
        event.extend_from_slice(&0u16.to_le_bytes());
        event.extend_from_slice(&body);
        event.extend_from_slice(&[0u8; 4]);

        assert_eq!(extract_gtid(&event).unwrap(), "61d5b289-bccc-11f0-b921-cabbb4ee51f6:42");
    }

    #[test]
    fn short_event_rejected() {
        let event = vec![0u8; 30];
        assert!(extract_gtid(&event).is_err());
    }
}
