use std::io::{self, Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use binlog::gtid::GtidCodec;
use common::err::CResult;

const COM_BINLOG_DUMP_GTID: u8 = 0x1E;

/// Opens the binlog stream from a GTID set.
///
/// Layout: command byte, u16 flags, u32 server_id, u32 name length + name
/// (empty: the GTID set positions the stream), u64 position, u32 data size
/// + encoded GTID set.
pub struct DumpBinlogGtidCommand {
    pub server_id: u32,
    pub gtid_set: String,
    pub flags: u16,
}

impl DumpBinlogGtidCommand {
    pub fn new(server_id: u32, gtid_set: &str) -> Self {
        Self {
            server_id,
            gtid_set: gtid_set.to_string(),
            flags: 0,
        }
    }

    pub fn serialize(&self) -> CResult<Vec<u8>> {
        let gtid_data = GtidCodec::encode(&self.gtid_set)?;

        let mut vec = Vec::new();
        let mut cursor = Cursor::new(&mut vec);

        let write = |cursor: &mut Cursor<&mut Vec<u8>>| -> Result<(), io::Error> {
            cursor.write_u8(COM_BINLOG_DUMP_GTID)?;
            cursor.write_u16::<LittleEndian>(self.flags)?;
            cursor.write_u32::<LittleEndian>(self.server_id)?;
            cursor.write_u32::<LittleEndian>(0)?; // binlog file name length
            cursor.write_u64::<LittleEndian>(4)?; // position: start of file
            cursor.write_u32::<LittleEndian>(gtid_data.len() as u32)?;
            cursor.write_all(&gtid_data)?;
            Ok(())
        };
        write(&mut cursor)?;
        Ok(vec)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout_with_gtid_set() {
        let command = DumpBinlogGtidCommand::new(99, "61d5b289-bccc-11f0-b921-cabbb4ee51f6:1-3");
        let bytes = command.serialize().unwrap();

        assert_eq!(bytes[0], 0x1E);
        assert_eq!(&bytes[1..3], &0u16.to_le_bytes()); // flags
        assert_eq!(&bytes[3..7], &99u32.to_le_bytes()); // server id
        assert_eq!(&bytes[7..11], &0u32.to_le_bytes()); // empty file name
        assert_eq!(&bytes[11..19], &4u64.to_le_bytes()); // position
        assert_eq!(&bytes[19..23], &48u32.to_le_bytes()); // gtid data size
        assert_eq!(bytes.len(), 23 + 48);
    }

    #[test]
    fn empty_set_encodes_eight_zeros() {
        let bytes = DumpBinlogGtidCommand::new(1, "").serialize().unwrap();
        assert_eq!(&bytes[19..23], &8u32.to_le_bytes());
        assert_eq!(&bytes[23..], &[0u8; 8]);
    }
}
