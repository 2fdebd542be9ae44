use tracing::warn;

use common::err::{CResult, Error};

use crate::column::ColumnType;
use crate::events::event_header::{EventHeader, COMMON_HEADER_LEN};
use crate::metadata::{ColumnMetadata, TableMetadata};
use crate::utils::{bitmap_bytes, read_packed_integer, sanitize_utf8, uint2korr, uint6korr};

/// Upper bound on the column count a TABLE_MAP may declare.
pub const MAX_COLUMNS: u64 = 4096;

// Optional-metadata TLV type codes (binlog_row_metadata >= MINIMAL).
const OPT_META_SIGNEDNESS: u8 = 1;
const OPT_META_COLUMN_NAME: u8 = 4;

/// Parses a TABLE_MAP event into schema metadata.
///
/// Layout after the common header: 6-byte table_id, 2-byte flags,
/// length-prefixed database and table names (both NUL-terminated on the
/// wire), a packed column count, one type byte per column, the packed-length
/// type-specific metadata block, the nullability bitmap and, on MySQL 8, a
/// TLV block that can carry signedness and real column names.
pub fn parse(event: &[u8]) -> CResult<TableMetadata> {
    let header = EventHeader::parse(event)?;
    let end = header.parseable_end();
    let mut pos = COMMON_HEADER_LEN;

    if pos + 8 > end {
        return Err(Error::Corrupt("TABLE_MAP too short for post-header".to_string()));
    }
    let table_id = uint6korr(&event[pos..]);
    pos += 6;
    pos += 2; // flags, unused

    let (database_name, after_db) = read_name(event, pos, end)?;
    pos = after_db;
    let (table_name, after_table) = read_name(event, pos, end)?;
    pos = after_table;

    let (column_count, consumed) = read_packed_integer(&event[pos..end])
        .ok_or_else(|| Error::Corrupt("TABLE_MAP truncated at column count".to_string()))?;
    pos += consumed;

    if column_count > MAX_COLUMNS {
        return Err(Error::InvalidInput(format!(
            "TABLE_MAP declares {} columns, cap is {}",
            column_count, MAX_COLUMNS
        )));
    }
    let column_count = column_count as usize;

    if pos + column_count > end {
        return Err(Error::Corrupt("TABLE_MAP truncated at column types".to_string()));
    }
    let mut columns = Vec::with_capacity(column_count);
    for i in 0..column_count {
        let type_byte = event[pos + i];
        let column_type = ColumnType::try_from(type_byte)
            .map_err(|_| Error::Unsupported(format!("unknown column type {} in TABLE_MAP", type_byte)))?;
        columns.push(ColumnMetadata {
            column_type,
            metadata: 0,
            nullable: false,
            unsigned: false,
            name: format!("col_{}", i),
        });
    }
    pos += column_count;

    // Type-specific metadata block.
    let (metadata_len, consumed) = read_packed_integer(&event[pos..end])
        .ok_or_else(|| Error::Corrupt("TABLE_MAP truncated at metadata length".to_string()))?;
    pos += consumed;
    let metadata_end = pos + metadata_len as usize;
    if metadata_end > end {
        return Err(Error::Corrupt("TABLE_MAP metadata block crosses event end".to_string()));
    }
    for column in columns.iter_mut() {
        let width = column.column_type.metadata_width();
        if width == 0 {
            continue;
        }
        if pos + width > metadata_end {
            return Err(Error::Corrupt("TABLE_MAP metadata block truncated".to_string()));
        }
        column.metadata = match width {
            1 => u16::from(event[pos]),
            _ => uint2korr(&event[pos..]),
        };
        pos += width;
    }
    pos = metadata_end;

    // Nullability bitmap.
    let null_bitmap_size = bitmap_bytes(column_count);
    if pos + null_bitmap_size <= end {
        for (i, column) in columns.iter_mut().enumerate() {
            column.nullable = crate::utils::bitmap_is_set(&event[pos..], i);
        }
        pos += null_bitmap_size;
    }

    // Optional metadata TLVs. Signedness and column names are the two the
    // pipeline uses; everything else is skipped.
    while pos + 1 < end {
        let tlv_type = event[pos];
        pos += 1;
        let Some((tlv_len, consumed)) = read_packed_integer(&event[pos..end]) else {
            break;
        };
        pos += consumed;
        let tlv_len = tlv_len as usize;
        if pos + tlv_len > end {
            warn!(
                event = "table_map_warning",
                table_id,
                tlv_type,
                "optional metadata TLV crosses event end"
            );
            break;
        }
        match tlv_type {
            OPT_META_SIGNEDNESS => apply_signedness(&mut columns, &event[pos..pos + tlv_len]),
            OPT_META_COLUMN_NAME => apply_column_names(&mut columns, &event[pos..pos + tlv_len]),
            _ => {}
        }
        pos += tlv_len;
    }

    Ok(TableMetadata {
        table_id,
        database_name,
        table_name,
        columns,
    })
}

/// 1-byte length + bytes + NUL terminator.
fn read_name(event: &[u8], pos: usize, end: usize) -> CResult<(String, usize)> {
    if pos >= end {
        return Err(Error::Corrupt("TABLE_MAP truncated at name length".to_string()));
    }
    let len = event[pos] as usize;
    let start = pos + 1;
    if start + len + 1 > end {
        return Err(Error::Corrupt("TABLE_MAP truncated at name".to_string()));
    }
    Ok((sanitize_utf8(&event[start..start + len]), start + len + 1))
}

/// One bit per numeric column, most significant bit first.
fn apply_signedness(columns: &mut [ColumnMetadata], bits: &[u8]) {
    let mut numeric_index = 0usize;
    for column in columns.iter_mut() {
        if !is_numeric(column.column_type) {
            continue;
        }
        let byte = numeric_index / 8;
        let bit = 7 - (numeric_index % 8);
        if byte < bits.len() {
            column.unsigned = (bits[byte] >> bit) & 1 == 1;
        }
        numeric_index += 1;
    }
}

fn is_numeric(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::Tiny
            | ColumnType::Short
            | ColumnType::Int24
            | ColumnType::Long
            | ColumnType::LongLong
            | ColumnType::Float
            | ColumnType::Double
            | ColumnType::Decimal
            | ColumnType::NewDecimal
    )
}

/// Packed-length-prefixed name per column, in column order.
fn apply_column_names(columns: &mut [ColumnMetadata], mut data: &[u8]) {
    for column in columns.iter_mut() {
        let Some((len, consumed)) = read_packed_integer(data) else {
            return;
        };
        let len = len as usize;
        data = &data[consumed..];
        if data.len() < len {
            return;
        }
        column.name = sanitize_utf8(&data[..len]);
        data = &data[len..];
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;

    /// Builds a TABLE_MAP event buffer (without the status byte) for tests.
    pub fn build_table_map(
        table_id: u64,
        database: &str,
        table: &str,
        columns: &[(ColumnType, u16, bool)], // (type, metadata, unsigned)
        names: &[&str],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&table_id.to_le_bytes()[..6]);
        body.extend_from_slice(&0u16.to_le_bytes());

        body.push(database.len() as u8);
        body.extend_from_slice(database.as_bytes());
        body.push(0);
        body.push(table.len() as u8);
        body.extend_from_slice(table.as_bytes());
        body.push(0);

        body.push(columns.len() as u8); // packed int, small counts only
        for (column_type, _, _) in columns {
            body.push(*column_type as u8);
        }

        let mut meta_block = Vec::new();
        for (column_type, metadata, _) in columns {
            match column_type.metadata_width() {
                1 => meta_block.push(*metadata as u8),
                2 => meta_block.extend_from_slice(&metadata.to_le_bytes()),
                _ => {}
            }
        }
        body.push(meta_block.len() as u8);
        body.extend_from_slice(&meta_block);

        // Nullability bitmap: everything nullable.
        body.extend_from_slice(&vec![0xFF; bitmap_bytes(columns.len())]);

        // Signedness TLV.
        let numeric_count = columns.iter().filter(|(t, _, _)| is_numeric(*t)).count();
        if numeric_count > 0 {
            let mut bits = vec![0u8; bitmap_bytes(numeric_count)];
            let mut numeric_index = 0;
            for (column_type, _, unsigned) in columns {
                if !is_numeric(*column_type) {
                    continue;
                }
                if *unsigned {
                    bits[numeric_index / 8] |= 1 << (7 - numeric_index % 8);
                }
                numeric_index += 1;
            }
            body.push(OPT_META_SIGNEDNESS);
            body.push(bits.len() as u8);
            body.extend_from_slice(&bits);
        }

        // Column-name TLV.
        if !names.is_empty() {
            let mut name_block = Vec::new();
            for name in names {
                name_block.push(name.len() as u8);
                name_block.extend_from_slice(name.as_bytes());
            }
            body.push(OPT_META_COLUMN_NAME);
            body.push(name_block.len() as u8);
            body.extend_from_slice(&name_block);
        }

        let event_size = (COMMON_HEADER_LEN + body.len() + 4) as u32;
        let mut event = Vec::new();
        event.extend_from_slice(&0u32.to_le_bytes());
        event.push(crate::events::EventType::TableMap as u8);
        event.extend_from_slice(&1u32.to_le_bytes());
        event.extend_from_slice(&event_size.to_le_bytes());
        event.extend_from_slice(&0u32.to_le_bytes());
        event.extend_from_slice(&0u16.to_le_bytes());
        event.extend_from_slice(&body);
        event.extend_from_slice(&[0u8; 4]); // checksum space
        event
    }
}
