//! PKZip archives
//!
//! Each file is stored as a local header, its name and its (possibly compressed) data. A
//! central directory repeating every header with the offset of its local header follows the
//! data, and an end record pointing at the central directory closes the archive. Stored,
//! deflated and bzip2 compressed entries are supported; anything else opens fine but fails to
//! load. Zip64 archives are not supported.

use std::io::{Cursor, Seek, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use super::{dir_paths, entry_paths, offset32, split_path};
use crate::{
    compression::{compress, CompressionMethod, CRC32},
    dir::ArchiveDir,
    entry::{Encoding, Entry, Lazy, Property},
    error::{malformed, unsupported, Result},
    sniff::Confidence,
    source::Source,
};

const LOCAL_HEADER_SIZE: u64 = 30;
const END_RECORD_SIZE: usize = 22;
const END_MAGIC: &[u8; 4] = b"PK\x05\x06";
const VERSION: u16 = 20;
const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_UTF8: u16 = 0x0800;
const ATTRIBUTE_DIRECTORY: u32 = 0x10;
const DEFAULT_DOS_DATE: u16 = (1 << 5) | 1;

/// Entry property holding the MS-DOS modification time
pub const DOS_TIME_PROPERTY: &str = "dos_time";

/// Entry property holding the MS-DOS modification date
pub const DOS_DATE_PROPERTY: &str = "dos_date";

#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[brw(magic = b"PK\x03\x04", little)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
    #[br(count = name_len)]
    pub name: Vec<u8>,
    #[br(count = extra_len)]
    pub extra: Vec<u8>,
}

#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[brw(magic = b"PK\x01\x02", little)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
    pub comment_len: u16,
    pub disk_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    #[br(count = name_len)]
    pub name: Vec<u8>,
    #[br(count = extra_len)]
    pub extra: Vec<u8>,
    #[br(count = comment_len)]
    pub comment: Vec<u8>,
}

#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[brw(magic = b"PK\x05\x06", little)]
pub struct EndOfCentralDirectory {
    pub disk: u16,
    pub central_disk: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub central_size: u32,
    pub central_offset: u32,
    pub comment_len: u16,
    #[br(count = comment_len)]
    pub comment: Vec<u8>,
}

/// Offset of the end of central directory record, searching back over a trailing comment
fn find_end_record(data: &[u8]) -> Option<usize> {
    let last = data.len().checked_sub(END_RECORD_SIZE)?;
    let first = last.saturating_sub(u16::MAX as usize);
    (first..=last)
        .rev()
        .find(|offset| data.get(*offset..offset + 4) == Some(&END_MAGIC[..]))
}

pub fn sniff(data: &[u8]) -> Confidence {
    match (data.get(..4), find_end_record(data)) {
        (Some(b"PK\x03\x04"), Some(_)) => Confidence::Certain,
        (Some(b"PK\x05\x06"), Some(0)) => Confidence::Certain,
        (Some(b"PK\x03\x04"), None) => Confidence::Unlikely,
        _ => Confidence::None,
    }
}

fn encoding_for(flags: u16, method: u16, size: u32) -> Encoding {
    if flags & FLAG_ENCRYPTED != 0 {
        return Encoding::Unsupported(method);
    }
    match CompressionMethod::from_zip_method(method) {
        Some(CompressionMethod::None) => Encoding::Raw,
        Some(method) => Encoding::Compressed {
            method,
            size: size as u64,
        },
        None => Encoding::Unsupported(method),
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let end_offset =
        find_end_record(source).ok_or_else(|| malformed("no end of central directory record"))?;
    let end = EndOfCentralDirectory::read(&mut Cursor::new(&source[end_offset..]))?;
    if end.total_entries == u16::MAX || end.central_offset == u32::MAX {
        return Err(unsupported("zip64 archives are not supported"));
    }

    let mut central = Cursor::new(source.slice(
        end.central_offset as u64,
        end.central_size as u64,
    )?);
    for _ in 0..end.total_entries {
        let record = CentralDirectoryHeader::read(&mut central)?;
        let path = String::from_utf8_lossy(&record.name).into_owned();
        let (dir, name) = split_path(path.trim_start_matches('/'));
        if name.is_empty() {
            debug!(%path, "directory");
            root.ensure_subdir_path(dir);
            continue;
        }

        let local_offset = record.local_header_offset as u64;
        source.check(local_offset, LOCAL_HEADER_SIZE)?;
        let local = LocalFileHeader::read(&mut Cursor::new(&source[local_offset as usize..]))?;
        let data_offset =
            local_offset + LOCAL_HEADER_SIZE + local.name_len as u64 + local.extra_len as u64;
        source.check(data_offset, record.compressed_size as u64)?;
        debug!(%path, method = record.method, size = record.uncompressed_size, "file");

        let lazy = Lazy::raw(source, data_offset, record.compressed_size as u64)
            .with_encoding(encoding_for(
                record.flags,
                record.method,
                record.uncompressed_size,
            ))
            .with_checksum(record.crc32);
        let mut entry = Entry::from_source(name, lazy);
        let properties = entry.properties_mut();
        properties.insert(
            DOS_TIME_PROPERTY.to_owned(),
            Property::Int(record.mod_time as i64),
        );
        properties.insert(
            DOS_DATE_PROPERTY.to_owned(),
            Property::Int(record.mod_date as i64),
        );
        root.ensure_subdir_path(dir).add_entry(entry.into_ref(), None);
    }

    Ok(())
}

fn write_file<W: Write + Seek>(
    out: &mut W,
    start: u64,
    path: &str,
    data: &[u8],
    times: (u16, u16),
    directory: bool,
) -> Result<CentralDirectoryHeader> {
    let packed = if data.is_empty() {
        None
    } else {
        let packed = compress(data, CompressionMethod::Deflate)?;
        (packed.len() < data.len()).then_some(packed)
    };
    let (method, stored) = match &packed {
        Some(packed) => (CompressionMethod::Deflate, packed.as_slice()),
        None => (CompressionMethod::None, data),
    };

    let name = path.as_bytes().to_vec();
    let name_len = u16::try_from(name.len())
        .map_err(|_| unsupported(format!("{path} is too long for a zip archive")))?;
    let flags = if path.is_ascii() { 0 } else { FLAG_UTF8 };
    let method = method.zip_method().unwrap_or_default();
    let crc32 = CRC32.checksum(data);
    let offset = offset32(out.stream_position()? - start)?;

    LocalFileHeader {
        version_needed: VERSION,
        flags,
        method,
        mod_time: times.0,
        mod_date: times.1,
        crc32,
        compressed_size: offset32(stored.len() as u64)?,
        uncompressed_size: offset32(data.len() as u64)?,
        name_len,
        extra_len: 0,
        name: name.clone(),
        extra: Vec::new(),
    }
    .write(out)?;
    out.write_all(stored)?;

    Ok(CentralDirectoryHeader {
        version_made_by: VERSION,
        version_needed: VERSION,
        flags,
        method,
        mod_time: times.0,
        mod_date: times.1,
        crc32,
        compressed_size: offset32(stored.len() as u64)?,
        uncompressed_size: offset32(data.len() as u64)?,
        name_len,
        extra_len: 0,
        comment_len: 0,
        disk_start: 0,
        internal_attributes: 0,
        external_attributes: if directory { ATTRIBUTE_DIRECTORY } else { 0 },
        local_header_offset: offset,
        name,
        extra: Vec::new(),
        comment: Vec::new(),
    })
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let start = out.stream_position()?;
    let mut stored = Vec::new();

    for path in dir_paths(root) {
        stored.push(write_file(out, start, &path, &[], (0, DEFAULT_DOS_DATE), true)?);
    }

    for (path, entry) in entry_paths(root) {
        let entry = entry.read();
        let data = entry.payload()?;
        let property = |key: &str, default: u16| {
            entry
                .property(key)
                .and_then(Property::as_int)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(default)
        };
        let times = (
            property(DOS_TIME_PROPERTY, 0),
            property(DOS_DATE_PROPERTY, DEFAULT_DOS_DATE),
        );
        stored.push(write_file(out, start, &path, &data, times, false)?);
    }

    let count = u16::try_from(stored.len())
        .ok()
        .filter(|count| *count != u16::MAX)
        .ok_or_else(|| unsupported("too many entries for a zip archive without zip64"))?;

    let central_offset = out.stream_position()?;
    for header in &stored {
        header.write(out)?;
    }
    let central_end = out.stream_position()?;

    EndOfCentralDirectory {
        disk: 0,
        central_disk: 0,
        disk_entries: count,
        total_entries: count,
        central_size: offset32(central_end - central_offset)?,
        central_offset: offset32(central_offset - start)?,
        comment_len: 0,
        comment: Vec::new(),
    }
    .write(out)?;

    Ok(())
}
