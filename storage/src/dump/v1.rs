use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{info, warn};

use common::config::Config;
use common::err::Error;
use common::time_util;
use index::NGramIndex;

use crate::doc_store::DocumentStore;
use crate::dump::{
    CrcErrorType, DumpError, DumpFlags, DumpInfo, DumpResult, DumpStatistics, IntegrityError, TableStatistics,
    CURRENT_VERSION, FIXED_HEADER_SIZE, MAGIC, MAX_SUPPORTED_VERSION, MIN_SUPPORTED_VERSION,
};

/// Byte offset of the file CRC32 within the V1 header. The CRC is computed
/// over the whole file with these four bytes skipped.
const FILE_CRC_OFFSET: u64 = 32;

/// Cap for any single section length claimed by a dump file.
const MAX_SECTION_LENGTH: u32 = 1024 * 1024 * 1024;

/// The stored GTID plus the deserialised sections of a dump.
#[derive(Debug)]
pub struct DumpPayload {
    pub gtid: String,
    pub config: Config,
    pub stats: Option<DumpStatistics>,
    pub table_stats: HashMap<String, TableStatistics>,
}

/// Writes a complete V1 dump atomically.
///
/// The data lands in `<path>.tmp` first (exclusive create, no symlink
/// following, mode 0600), the header is patched with the final size and the
/// streaming CRC, the file is fsynced, and only then does a rename make it
/// visible. A crash at any point leaves either the previous dump or the new
/// one, never a partial file.
pub fn write_dump_v1(
    path: &Path,
    gtid: &str,
    config: &Config,
    tables: &BTreeMap<String, (&NGramIndex, &DocumentStore)>,
    stats: Option<&DumpStatistics>,
    table_stats: Option<&HashMap<String, TableStatistics>>,
) -> DumpResult<()> {
    let temp_path = {
        let mut os_string = path.as_os_str().to_os_string();
        os_string.push(".tmp");
        std::path::PathBuf::from(os_string)
    };

    // A temp file left behind by a crashed writer would make the exclusive
    // create fail forever.
    let _ = fs::remove_file(&temp_path);

    let result = write_to_temp(&temp_path, gtid, config, tables, stats, table_stats);
    match result {
        Ok(()) => {
            fs::rename(&temp_path, path).map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                DumpError::from(e)
            })?;
            info!(event = "dump_write", path = %path.display(), gtid = %gtid, tables = tables.len(), "dump written");
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

fn open_exclusive(temp_path: &Path) -> DumpResult<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600).custom_flags(libc::O_NOFOLLOW);
    }
    let file = options.open(temp_path)?;

    // The freshly created file must belong to us; anything else means the
    // path was raced.
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let metadata = file.metadata()?;
        let euid = unsafe { libc::geteuid() };
        if metadata.uid() != euid {
            return Err(DumpError::Other(Error::PermissionDenied(format!(
                "dump temp file owner {} does not match effective uid {}",
                metadata.uid(),
                euid
            ))));
        }
    }
    Ok(file)
}

fn write_to_temp(
    temp_path: &Path,
    gtid: &str,
    config: &Config,
    tables: &BTreeMap<String, (&NGramIndex, &DocumentStore)>,
    stats: Option<&DumpStatistics>,
    table_stats: Option<&HashMap<String, TableStatistics>>,
) -> DumpResult<()> {
    let file = open_exclusive(temp_path)?;
    let mut writer = BufWriter::new(file);

    let mut flags = DumpFlags::WITH_CRC;
    if stats.is_some() {
        flags |= DumpFlags::WITH_STATISTICS;
    }

    // Fixed header.
    writer.write_all(&MAGIC)?;
    writer.write_u32::<LittleEndian>(CURRENT_VERSION)?;

    // V1 header with placeholder size and CRC.
    let header_size = 4 + 4 + 8 + 8 + 4 + 4 + gtid.len() as u32;
    writer.write_u32::<LittleEndian>(header_size)?;
    writer.write_u32::<LittleEndian>(flags.bits())?;
    writer.write_u64::<LittleEndian>(time_util::epoch_seconds())?;
    writer.write_u64::<LittleEndian>(0)?; // total_file_size, patched below
    writer.write_u32::<LittleEndian>(0)?; // file_crc32, patched below
    write_string(&mut writer, gtid)?;

    // Config section.
    let config_bytes =
        serde_json::to_vec(config).map_err(|e| DumpError::Other(Error::Internal(format!("config serialize: {}", e))))?;
    write_section(&mut writer, &config_bytes)?;

    // Optional aggregate statistics.
    if let Some(stats) = stats {
        write_section(&mut writer, &encode_stats(stats))?;
    }

    // Table data.
    writer.write_u32::<LittleEndian>(tables.len() as u32)?;
    for (name, (table_index, doc_store)) in tables {
        write_string(&mut writer, name)?;
        if stats.is_some() {
            let per_table = table_stats.and_then(|m| m.get(name)).cloned().unwrap_or_default();
            write_section(&mut writer, &encode_table_stats(&per_table))?;
        }
        write_section(&mut writer, &table_index.to_bytes())?;
        write_section(&mut writer, &doc_store.to_bytes())?;
    }

    writer.flush()?;
    let mut file = writer.into_inner().map_err(|e| DumpError::Other(Error::Internal(e.to_string())))?;

    // Patch the total size, then the streaming CRC over everything except
    // the CRC field itself.
    let total_size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(FIXED_HEADER_SIZE as u64 + 16))?;
    file.write_u64::<LittleEndian>(total_size)?;

    let crc = compute_file_crc(&mut file)?;
    file.seek(SeekFrom::Start(FILE_CRC_OFFSET))?;
    file.write_u32::<LittleEndian>(crc)?;

    file.sync_all()?;
    Ok(())
}

/// CRC32 (zlib polynomial) of the whole file, skipping the four CRC bytes.
fn compute_file_crc(file: &mut File) -> DumpResult<u32> {
    file.seek(SeekFrom::Start(0))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut reader = BufReader::new(file);
    let mut buffer = [0u8; 64 * 1024];
    let mut position = 0u64;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        let chunk_start = position;
        let chunk_end = position + read as u64;
        let crc_start = FILE_CRC_OFFSET;
        let crc_end = FILE_CRC_OFFSET + 4;

        if chunk_end <= crc_start || chunk_start >= crc_end {
            hasher.update(&buffer[..read]);
        } else {
            // Chunk overlaps the CRC field: hash around it.
            if crc_start > chunk_start {
                hasher.update(&buffer[..(crc_start - chunk_start) as usize]);
            }
            if chunk_end > crc_end {
                hasher.update(&buffer[(crc_end - chunk_start) as usize..read]);
            }
        }
        position = chunk_end;
    }
    Ok(hasher.finalize())
}

/// Restores a dump into pre-allocated, empty index/doc-store pairs and
/// returns the stored GTID so replication can resume.
///
/// Every CRC-bearing section is verified before it is deserialised.
pub fn read_dump_v1(
    path: &Path,
    tables: &mut HashMap<String, (&mut NGramIndex, &mut DocumentStore)>,
) -> DumpResult<DumpPayload> {
    let mut file = File::open(path)?;
    let (header, flags) = read_and_validate_headers(&mut file, path, true)?;

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(FIXED_HEADER_SIZE as u64 + header.header_size as u64))?;

    // Config section.
    let config_bytes = read_section(&mut reader, CrcErrorType::ConfigCrc, "")?;
    let config: Config = serde_json::from_slice(&config_bytes)
        .map_err(|e| DumpError::Other(Error::Corrupt(format!("config section does not deserialize: {}", e))))?;

    // Optional aggregate statistics.
    let stats = if flags.contains(DumpFlags::WITH_STATISTICS) {
        let bytes = read_section(&mut reader, CrcErrorType::StatsCrc, "")?;
        Some(decode_stats(&bytes)?)
    } else {
        None
    };

    // Table data.
    let table_count = reader.read_u32::<LittleEndian>()?;
    let mut table_stats = HashMap::new();
    for _ in 0..table_count {
        let name = read_string(&mut reader)?;
        if flags.contains(DumpFlags::WITH_STATISTICS) {
            let bytes = read_section(&mut reader, CrcErrorType::TableStatsCrc, &name)?;
            table_stats.insert(name.clone(), decode_table_stats(&bytes)?);
        }
        let index_bytes = read_section(&mut reader, CrcErrorType::IndexCrc, &name)?;
        let doc_bytes = read_section(&mut reader, CrcErrorType::DocStoreCrc, &name)?;

        let Some((table_index, doc_store)) = tables.get_mut(&name) else {
            return Err(DumpError::Other(Error::NotFound(format!(
                "dump holds table '{}' which is not in the catalog",
                name
            ))));
        };
        table_index.load_bytes(&index_bytes)?;
        doc_store.load_bytes(&doc_bytes)?;
    }

    info!(event = "dump_read", path = %path.display(), gtid = %header.gtid, tables = table_count, "dump loaded");
    Ok(DumpPayload {
        gtid: header.gtid,
        config,
        stats,
        table_stats,
    })
}

/// Magic, version range, size and file-CRC validation without touching the
/// section bodies.
pub fn verify_dump_integrity(path: &Path) -> DumpResult<()> {
    let mut file = File::open(path)?;
    read_and_validate_headers(&mut file, path, true)?;
    Ok(())
}

/// Headers + config only: cheap metadata for DUMP INFO. Performs no CRC
/// validation.
pub fn get_dump_info(path: &Path) -> DumpResult<DumpInfo> {
    let mut file = File::open(path)?;
    let (header, flags) = read_and_validate_headers(&mut file, path, false)?;

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(FIXED_HEADER_SIZE as u64 + header.header_size as u64))?;
    let config_bytes = read_section_unchecked(&mut reader)?;
    let config: Config = serde_json::from_slice(&config_bytes)
        .map_err(|e| DumpError::Other(Error::Corrupt(format!("config section does not deserialize: {}", e))))?;

    Ok(DumpInfo {
        version: header.version,
        gtid: header.gtid,
        table_count: config.tables.len() as u32,
        flags: flags.bits(),
        file_size: header.total_file_size,
        timestamp: header.timestamp,
        has_statistics: flags.contains(DumpFlags::WITH_STATISTICS),
    })
}

struct HeaderV1 {
    version: u32,
    header_size: u32,
    timestamp: u64,
    total_file_size: u64,
    file_crc32: u32,
    gtid: String,
}

fn read_and_validate_headers(file: &mut File, path: &Path, check_crc: bool) -> DumpResult<(HeaderV1, DumpFlags)> {
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(DumpError::Other(Error::Corrupt(format!(
            "{} is not a dump file (bad magic)",
            path.display()
        ))));
    }
    let version = file.read_u32::<LittleEndian>()?;
    if !(MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&version) {
        return Err(DumpError::Other(Error::Unsupported(format!(
            "dump version {} is outside the supported range [{}, {}]",
            version, MIN_SUPPORTED_VERSION, MAX_SUPPORTED_VERSION
        ))));
    }

    let header_size = file.read_u32::<LittleEndian>()?;
    let raw_flags = file.read_u32::<LittleEndian>()?;
    let timestamp = file.read_u64::<LittleEndian>()?;
    let total_file_size = file.read_u64::<LittleEndian>()?;
    let file_crc32 = file.read_u32::<LittleEndian>()?;
    let gtid = read_string(file)?;

    let flags = DumpFlags::from_bits_truncate(raw_flags);

    let actual_size = file.metadata()?.len();
    if actual_size != total_file_size {
        return Err(DumpError::Integrity(IntegrityError::new(
            CrcErrorType::FileCrc,
            format!("File size mismatch: header says {}, file is {}", total_file_size, actual_size),
        )));
    }

    if check_crc {
        let computed = compute_file_crc(file)?;
        if computed != file_crc32 {
            warn!(
                event = "dump_integrity",
                path = %path.display(),
                stored = file_crc32,
                computed,
                "file CRC mismatch"
            );
            return Err(DumpError::Integrity(IntegrityError::new(
                CrcErrorType::FileCrc,
                "CRC32 checksum mismatch",
            )));
        }
    }

    Ok((
        HeaderV1 {
            version,
            header_size,
            timestamp,
            total_file_size,
            file_crc32,
            gtid,
        },
        flags,
    ))
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> DumpResult<()> {
    writer.write_u32::<LittleEndian>(value.len() as u32)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> DumpResult<String> {
    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_SECTION_LENGTH {
        return Err(DumpError::Other(Error::Corrupt(format!(
            "string length {} exceeds cap",
            len
        ))));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| DumpError::Other(Error::Corrupt("non-UTF-8 string in dump".to_string())))
}

/// Length + CRC32 + payload.
fn write_section<W: Write>(writer: &mut W, payload: &[u8]) -> DumpResult<()> {
    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_u32::<LittleEndian>(crc32fast::hash(payload))?;
    writer.write_all(payload)?;
    Ok(())
}

fn read_section<R: Read>(reader: &mut R, error_type: CrcErrorType, table_name: &str) -> DumpResult<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_SECTION_LENGTH {
        return Err(DumpError::Other(Error::Corrupt(format!(
            "section length {} exceeds cap",
            len
        ))));
    }
    let stored_crc = reader.read_u32::<LittleEndian>()?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;

    let computed = crc32fast::hash(&payload);
    if computed != stored_crc {
        return Err(DumpError::Integrity(IntegrityError::for_table(
            error_type,
            "CRC32 checksum mismatch",
            table_name,
        )));
    }
    Ok(payload)
}

fn read_section_unchecked<R: Read>(reader: &mut R) -> DumpResult<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()?;
    if len > MAX_SECTION_LENGTH {
        return Err(DumpError::Other(Error::Corrupt(format!(
            "section length {} exceeds cap",
            len
        ))));
    }
    let _crc = reader.read_u32::<LittleEndian>()?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

fn encode_stats(stats: &DumpStatistics) -> Vec<u8> {
    let mut out = Vec::with_capacity(40);
    out.write_u64::<LittleEndian>(stats.total_documents).unwrap();
    out.write_u64::<LittleEndian>(stats.total_terms).unwrap();
    out.write_u64::<LittleEndian>(stats.total_index_bytes).unwrap();
    out.write_u64::<LittleEndian>(stats.total_docstore_bytes).unwrap();
    out.write_u64::<LittleEndian>(stats.dump_time_ms).unwrap();
    out
}

fn decode_stats(bytes: &[u8]) -> DumpResult<DumpStatistics> {
    let mut cursor = std::io::Cursor::new(bytes);
    Ok(DumpStatistics {
        total_documents: cursor.read_u64::<LittleEndian>()?,
        total_terms: cursor.read_u64::<LittleEndian>()?,
        total_index_bytes: cursor.read_u64::<LittleEndian>()?,
        total_docstore_bytes: cursor.read_u64::<LittleEndian>()?,
        dump_time_ms: cursor.read_u64::<LittleEndian>()?,
    })
}

fn encode_table_stats(stats: &TableStatistics) -> Vec<u8> {
    let mut out = Vec::with_capacity(44);
    out.write_u64::<LittleEndian>(stats.document_count).unwrap();
    out.write_u64::<LittleEndian>(stats.term_count).unwrap();
    out.write_u64::<LittleEndian>(stats.index_bytes).unwrap();
    out.write_u64::<LittleEndian>(stats.docstore_bytes).unwrap();
    out.write_u32::<LittleEndian>(stats.next_doc_id).unwrap();
    out.write_u64::<LittleEndian>(stats.last_update_time).unwrap();
    out
}

fn decode_table_stats(bytes: &[u8]) -> DumpResult<TableStatistics> {
    let mut cursor = std::io::Cursor::new(bytes);
    Ok(TableStatistics {
        document_count: cursor.read_u64::<LittleEndian>()?,
        term_count: cursor.read_u64::<LittleEndian>()?,
        index_bytes: cursor.read_u64::<LittleEndian>()?,
        docstore_bytes: cursor.read_u64::<LittleEndian>()?,
        next_doc_id: cursor.read_u32::<LittleEndian>()?,
        last_update_time: cursor.read_u64::<LittleEndian>()?,
    })
}
