use std::collections::HashMap;

use tracing::{debug, warn};

use common::err::{CResult, Error};

use crate::column::value_decoder::decode_value;
use crate::events::event_header::{EventHeader, COMMON_HEADER_LEN};
use crate::events::EventType;
use crate::metadata::TableMetadata;
use crate::utils::{bitmap_bytes, bitmap_is_set, read_packed_integer, uint2korr, uint6korr};

/// One row image: column name to value, `None` for SQL NULL.
pub type RowImage = HashMap<String, Option<String>>;

/// Decoded body of a WRITE/UPDATE/DELETE rows event.
#[derive(Debug)]
pub enum RowsEvent {
    Write(Vec<RowImage>),
    Update(Vec<(RowImage, RowImage)>),
    Delete(Vec<RowImage>),
}

impl RowsEvent {
    pub fn row_count(&self) -> usize {
        match self {
            RowsEvent::Write(rows) | RowsEvent::Delete(rows) => rows.len(),
            RowsEvent::Update(rows) => rows.len(),
        }
    }
}

// Post-header flag bits.
const ROWS_FLAG_EXTRA_INFO_V2: u16 = 0x0001;
const ROWS_FLAG_EXTRA_DATA_PRESENT: u16 = 0x0002;

/// Reads the table_id from a rows event without decoding the body, so the
/// caller can consult the metadata cache first.
pub fn peek_table_id(event: &[u8]) -> CResult<u64> {
    let header = EventHeader::parse(event)?;
    if COMMON_HEADER_LEN + 6 > header.parseable_end() {
        return Err(Error::Corrupt("rows event too short for table_id".to_string()));
    }
    Ok(uint6korr(&event[COMMON_HEADER_LEN..]))
}

/// Decodes every row of a rows event against the cached schema.
///
/// The parseable region ends four bytes before the embedded event size; the
/// trailing checksum space is never interpreted as row data. A malformed row
/// aborts the remaining rows of the event (framing is lost once a field
/// width cannot be trusted) but never the reader.
pub fn parse(event: &[u8], event_type: EventType, metadata: &TableMetadata) -> CResult<RowsEvent> {
    let header = EventHeader::parse(event)?;
    let end = header.parseable_end();
    let mut pos = COMMON_HEADER_LEN;

    if pos + 8 > end {
        return Err(Error::Corrupt("rows event too short for post-header".to_string()));
    }
    pos += 6; // table_id, already consumed by peek_table_id
    let flags = uint2korr(&event[pos..]);
    pos += 2;

    // V2 extra-row-info: a packed length that counts its own bytes.
    if flags & ROWS_FLAG_EXTRA_INFO_V2 != 0 {
        let (extra_len, consumed) = read_packed_integer(&event[pos..end])
            .ok_or_else(|| Error::Corrupt("rows event truncated at extra row info".to_string()))?;
        let skip = (extra_len as usize)
            .checked_sub(consumed)
            .ok_or_else(|| Error::Corrupt("extra row info length smaller than its own prefix".to_string()))?;
        pos += consumed;
        if pos + skip > end {
            return Err(Error::Corrupt("extra row info crosses event end".to_string()));
        }
        pos += skip;
    }

    let (column_count, consumed) = read_packed_integer(&event[pos..end])
        .ok_or_else(|| Error::Corrupt("rows event truncated at column count".to_string()))?;
    pos += consumed;
    let column_count = column_count as usize;

    if column_count != metadata.columns.len() {
        return Err(Error::InvalidInput(format!(
            "rows event declares {} columns, cached schema has {}",
            column_count,
            metadata.columns.len()
        )));
    }

    let bitmap_size = bitmap_bytes(column_count);
    let is_update = event_type == EventType::UpdateRows;

    if pos + bitmap_size * (1 + usize::from(is_update)) > end {
        return Err(Error::Corrupt("rows event truncated at columns-present bitmap".to_string()));
    }
    let columns_before = &event[pos..pos + bitmap_size];
    pos += bitmap_size;
    let columns_after = if is_update {
        let bitmap = &event[pos..pos + bitmap_size];
        pos += bitmap_size;
        bitmap
    } else {
        columns_before
    };

    // Legacy framing: a u16-length extra block signalled by its own flag.
    if flags & ROWS_FLAG_EXTRA_DATA_PRESENT != 0 {
        if pos + 2 > end {
            return Err(Error::Corrupt("rows event truncated at extra data length".to_string()));
        }
        let extra_len = uint2korr(&event[pos..]) as usize;
        if extra_len < 2 || pos + extra_len > end {
            return Err(Error::Corrupt("invalid extra data length".to_string()));
        }
        debug!(event = "binlog_debug", action = "skipped_extra_row_data", bytes = extra_len);
        pos += extra_len;
    }

    let mut writes = Vec::new();
    let mut updates = Vec::new();

    while pos < end {
        let before = parse_row_image(event, &mut pos, end, metadata, columns_before)?;
        if is_update {
            if pos >= end {
                return Err(Error::Corrupt("update rows event is missing the after-image".to_string()));
            }
            let after = parse_row_image(event, &mut pos, end, metadata, columns_after)?;
            updates.push((before, after));
        } else {
            writes.push(before);
        }
    }

    debug!(
        event = "binlog_debug",
        action = "parsed_rows",
        rows = if is_update { updates.len() } else { writes.len() },
        database = %metadata.database_name,
        table = %metadata.table_name,
    );

    Ok(match event_type {
        EventType::WriteRows => RowsEvent::Write(writes),
        EventType::DeleteRows => RowsEvent::Delete(writes),
        EventType::UpdateRows => RowsEvent::Update(updates),
        other => {
            return Err(Error::Internal(format!("{:?} is not a rows event", other)));
        }
    })
}

fn parse_row_image(
    event: &[u8],
    pos: &mut usize,
    end: usize,
    metadata: &TableMetadata,
    columns_present: &[u8],
) -> CResult<RowImage> {
    let column_count = metadata.columns.len();
    let null_bitmap_size = bitmap_bytes(column_count);
    if *pos + null_bitmap_size > end {
        return Err(Error::Corrupt("row truncated at NULL bitmap".to_string()));
    }
    let null_bitmap = event[*pos..*pos + null_bitmap_size].to_vec();
    *pos += null_bitmap_size;

    let mut row = RowImage::with_capacity(column_count);
    for (col_idx, column) in metadata.columns.iter().enumerate() {
        if !bitmap_is_set(columns_present, col_idx) {
            continue;
        }
        if bitmap_is_set(&null_bitmap, col_idx) {
            row.insert(column.name.clone(), None);
            continue;
        }
        if *pos > end {
            return Err(Error::Corrupt(format!("row truncated at column {}", col_idx)));
        }
        let (value, width) =
            decode_value(column.column_type, column.metadata, column.unsigned, &event[*pos..end]).map_err(|e| {
                warn!(
                    event = "mysql_binlog_warning",
                    table_id = metadata.table_id,
                    column_index = col_idx,
                    reason = %e,
                    "dropping row with undecodable column"
                );
                e
            })?;
        if width == 0 {
            return Err(Error::InvalidInput(format!(
                "column {} of type {:?} decoded to zero width",
                col_idx, column.column_type
            )));
        }
        *pos += width;
        row.insert(column.name.clone(), Some(value));
    }
    Ok(row)
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use crate::events::event_header::CHECKSUM_LEN;

    /// Builds a rows event (no status byte) from pre-encoded row images.
    /// Each image is the raw bytes of its fields in column order; NULL
    /// columns contribute no bytes and set their bit.
    pub fn build_rows_event(
        event_type: EventType,
        table_id: u64,
        column_count: usize,
        images: &[(Vec<usize>, Vec<u8>)], // (null column indexes, field bytes)
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&table_id.to_le_bytes()[..6]);
        body.extend_from_slice(&0u16.to_le_bytes()); // flags: no extra info

        body.push(column_count as u8); // packed int, small counts only

        let bitmap_size = bitmap_bytes(column_count);
        let all_present = vec![0xFFu8; bitmap_size];
        body.extend_from_slice(&all_present);
        if event_type == EventType::UpdateRows {
            body.extend_from_slice(&all_present);
        }

        for (null_columns, fields) in images {
            let mut null_bitmap = vec![0u8; bitmap_size];
            for idx in null_columns {
                null_bitmap[idx / 8] |= 1 << (idx % 8);
            }
            body.extend_from_slice(&null_bitmap);
            body.extend_from_slice(fields);
        }

        let event_size = (COMMON_HEADER_LEN + body.len() + CHECKSUM_LEN) as u32;
        let mut event = Vec::new();
        event.extend_from_slice(&0u32.to_le_bytes());
        event.push(event_type as u8);
        event.extend_from_slice(&1u32.to_le_bytes());
        event.extend_from_slice(&event_size.to_le_bytes());
        event.extend_from_slice(&0u32.to_le_bytes());
        event.extend_from_slice(&0u16.to_le_bytes());
        event.extend_from_slice(&body);
        event.extend_from_slice(&[0u8; CHECKSUM_LEN]);
        event
    }

    /// Field bytes for a one-byte-length-prefixed VARCHAR value.
    pub fn varchar_field(value: &str) -> Vec<u8> {
        let mut field = vec![value.len() as u8];
        field.extend_from_slice(value.as_bytes());
        field
    }
}
