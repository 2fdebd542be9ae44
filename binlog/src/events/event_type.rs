use num_enum::TryFromPrimitive;
use serde::Serialize;

/// Binlog event type byte at offset 4 of the common header.
///
/// Only the types the pipeline reacts to are named; everything else falls
/// through `try_from` and is ignored by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TryFromPrimitive)]
#[repr(u8)]
pub enum EventType {
    Query = 2,
    Rotate = 4,
    FormatDescription = 15,
    Xid = 16,
    TableMap = 19,
    WriteRows = 30,
    UpdateRows = 31,
    DeleteRows = 32,
    Gtid = 33,
    AnonymousGtid = 34,
    PreviousGtids = 35,
}
