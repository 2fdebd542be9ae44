pub mod v1;

use std::fmt::{self, Display, Formatter};

use bitflags::bitflags;

use common::err::Error;

/// Magic number at the front of every dump file ("MGDB").
pub const MAGIC: [u8; 4] = *b"MGDB";

/// Version this build writes.
pub const CURRENT_VERSION: u32 = 1;
/// Oldest version this build reads.
pub const MIN_SUPPORTED_VERSION: u32 = 1;
/// Newest version this build reads.
pub const MAX_SUPPORTED_VERSION: u32 = 1;

/// Magic + version.
pub const FIXED_HEADER_SIZE: usize = 8;

bitflags! {
    /// Feature flags stored in the V1 header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DumpFlags: u32 {
        /// Dump carries aggregate and per-table statistics sections.
        const WITH_STATISTICS = 0x0000_0008;
        /// CRC32 checksums present. Always set by V1 writers.
        const WITH_CRC = 0x0000_0010;
    }
}

/// Which checksum failed, for targeted diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrcErrorType {
    #[default]
    None,
    FileCrc,
    ConfigCrc,
    StatsCrc,
    TableStatsCrc,
    IndexCrc,
    DocStoreCrc,
}

/// Structured integrity failure surfaced by read and verify.
#[derive(Debug, Clone, Default)]
pub struct IntegrityError {
    pub error_type: CrcErrorType,
    pub message: String,
    /// Set for table-scoped section failures.
    pub table_name: String,
}

impl IntegrityError {
    pub fn new(error_type: CrcErrorType, message: impl Into<String>) -> Self {
        IntegrityError {
            error_type,
            message: message.into(),
            table_name: String::new(),
        }
    }

    pub fn for_table(error_type: CrcErrorType, message: impl Into<String>, table_name: impl Into<String>) -> Self {
        IntegrityError {
            error_type,
            message: message.into(),
            table_name: table_name.into(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error_type != CrcErrorType::None
    }
}

impl Display for IntegrityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.table_name.is_empty() {
            write!(f, "{:?}: {}", self.error_type, self.message)
        } else {
            write!(f, "{:?} ({}): {}", self.error_type, self.table_name, self.message)
        }
    }
}

/// Failure of a dump operation: either a structured integrity error or an
/// ordinary error (IO, serialization).
#[derive(Debug)]
pub enum DumpError {
    Integrity(IntegrityError),
    Other(Error),
}

impl Display for DumpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DumpError::Integrity(e) => write!(f, "{}", e),
            DumpError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DumpError {}

impl From<Error> for DumpError {
    fn from(error: Error) -> Self {
        DumpError::Other(error)
    }
}

impl From<std::io::Error> for DumpError {
    fn from(error: std::io::Error) -> Self {
        DumpError::Other(Error::from(error))
    }
}

impl From<IntegrityError> for DumpError {
    fn from(error: IntegrityError) -> Self {
        DumpError::Integrity(error)
    }
}

pub type DumpResult<T> = Result<T, DumpError>;

/// Aggregate statistics across every table, written under WITH_STATISTICS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpStatistics {
    pub total_documents: u64,
    pub total_terms: u64,
    pub total_index_bytes: u64,
    pub total_docstore_bytes: u64,
    pub dump_time_ms: u64,
}

/// Per-table statistics, written under WITH_STATISTICS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStatistics {
    pub document_count: u64,
    pub term_count: u64,
    pub index_bytes: u64,
    pub docstore_bytes: u64,
    pub next_doc_id: u32,
    pub last_update_time: u64,
}

/// Lightweight metadata of a dump file, for DUMP INFO.
#[derive(Debug, Clone, Default)]
pub struct DumpInfo {
    pub version: u32,
    pub gtid: String,
    pub table_count: u32,
    pub flags: u32,
    pub file_size: u64,
    pub timestamp: u64,
    pub has_statistics: bool,
}
