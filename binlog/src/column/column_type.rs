use num_enum::TryFromPrimitive;
use serde::Serialize;

/// Column type byte as declared by TABLE_MAP events.
///
/// Values follow the upstream `enum_field_types`; the gap between TIME2 (19)
/// and JSON (245) is real.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TryFromPrimitive)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    Varchar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    /// Width of the type-specific metadata entry in a TABLE_MAP event.
    pub fn metadata_width(&self) -> usize {
        match self {
            ColumnType::Varchar | ColumnType::VarString | ColumnType::String => 2,
            ColumnType::NewDecimal | ColumnType::Bit | ColumnType::Enum | ColumnType::Set => 2,
            ColumnType::Blob
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Json
            | ColumnType::Geometry => 1,
            ColumnType::Float | ColumnType::Double => 1,
            ColumnType::Timestamp2 | ColumnType::DateTime2 | ColumnType::Time2 => 1,
            _ => 0,
        }
    }
}
