use serde::Serialize;

use common::err::{CResult, Error};

use crate::utils::{uint2korr, uint4korr};

/// Length of the common header at the front of every event.
pub const COMMON_HEADER_LEN: usize = 19;

/// Trailing checksum bytes. They are reserved even when checksums are
/// disabled on the connection, so the parseable region always ends four
/// bytes before `event_size`.
pub const CHECKSUM_LEN: usize = 4;

/// The 19-byte common header:
///
/// ```txt
///                  [offset : len]
/// timestamp            0 : 4
/// event_type           4 : 1
/// server_id            5 : 4
/// event_size           9 : 4    (header + body + checksum)
/// log_pos             13 : 4
/// flags               17 : 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: u8,
    pub server_id: u32,
    pub event_size: u32,
    pub log_pos: u32,
    pub flags: u16,
}

impl EventHeader {
    /// Parses the common header from an event buffer (status byte already
    /// stripped) and validates the embedded size against the buffer.
    pub fn parse(event: &[u8]) -> CResult<EventHeader> {
        if event.len() < COMMON_HEADER_LEN + CHECKSUM_LEN {
            return Err(Error::Corrupt(format!(
                "event buffer of {} bytes is shorter than header + checksum",
                event.len()
            )));
        }
        let header = EventHeader {
            timestamp: uint4korr(&event[0..]),
            event_type: event[4],
            server_id: uint4korr(&event[5..]),
            event_size: uint4korr(&event[9..]),
            log_pos: uint4korr(&event[13..]),
            flags: uint2korr(&event[17..]),
        };
        let size = header.event_size as usize;
        if size < COMMON_HEADER_LEN + CHECKSUM_LEN || size > event.len() {
            return Err(Error::Corrupt(format!(
                "event_size {} is outside the {}-byte buffer",
                size,
                event.len()
            )));
        }
        Ok(header)
    }

    /// End of the region row parsers may touch: the embedded size minus the
    /// reserved checksum bytes.
    pub fn parseable_end(&self) -> usize {
        self.event_size as usize - CHECKSUM_LEN
    }
}
