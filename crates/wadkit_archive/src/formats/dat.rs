//! Shadowcaster DAT resource files
//!
//! | Offset | Field      | Description                       |
//! |--------|------------|-----------------------------------|
//! | 0x00   | Count      | 2 bytes: number of records        |
//! | 0x02   | Dir offset | 4 bytes: offset of the directory  |
//! | 0x06   | Reserved   | 4 bytes: zero                     |
//!
//! Each 12 byte record holds the data offset and size, the offset of the lump name inside the
//! name table, and a flags word. The name table directly follows the directory and holds NUL
//! terminated names. Flags are kept as the `flags` entry property; bit 0 marks RLE packed
//! lumps, which are passed through as stored.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use super::{in_bounds, offset32};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy, Property},
    error::{malformed, unsupported, Error, Result},
    sniff::Confidence,
    source::Source,
};

const HEADER_SIZE: u64 = 10;
const RECORD_SIZE: u64 = 12;

/// Entry property holding the record flags
pub const FLAGS_PROPERTY: &str = "flags";

/// Flag bit of lumps stored with run length packing
pub const RLE_FLAG: u16 = 0x0001;

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct DatHeader {
    pub count: u16,
    pub dir_offset: u32,
    pub reserved: u32,
}

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct DatRecord {
    pub offset: u32,
    pub size: u32,
    pub name_offset: u16,
    pub flags: u16,
}

/// The NUL terminated name at `offset` in `table`
fn table_name(table: &[u8], offset: u16) -> Option<&str> {
    let rest = table.get(offset as usize..)?;
    let end = rest.iter().position(|b| *b == 0)?;
    std::str::from_utf8(&rest[..end])
        .ok()
        .filter(|name| !name.is_empty())
}

/// Parse the directory, returning the records with their names
fn directory(data: &[u8]) -> Result<Vec<(DatRecord, String)>> {
    let header = DatHeader::read(&mut Cursor::new(data))?;
    let dir_len = header.count as u64 * RECORD_SIZE;
    let table_start = header.dir_offset as u64 + dir_len;
    if !in_bounds(data, header.dir_offset as u64, dir_len) {
        return Err(Error::Truncated {
            offset: header.dir_offset as u64,
            needed: dir_len,
            available: data.len() as u64,
        });
    }
    let table = &data[table_start as usize..];

    let mut dir = Cursor::new(&data[header.dir_offset as usize..table_start as usize]);
    let mut records = Vec::with_capacity(header.count as usize);
    for _ in 0..header.count {
        let record = DatRecord::read(&mut dir)?;
        let name = table_name(table, record.name_offset)
            .ok_or_else(|| malformed(format!("bad name offset {}", record.name_offset)))?;
        records.push((record, name.to_owned()));
    }
    Ok(records)
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Ok(header) = DatHeader::read(&mut Cursor::new(data)) else {
        return Confidence::None;
    };
    if header.count == 0 || (header.dir_offset as u64) < HEADER_SIZE {
        return Confidence::None;
    }
    let Ok(records) = directory(data) else {
        return Confidence::None;
    };
    let in_data = records.iter().all(|(record, name)| {
        name.bytes().all(|b| b.is_ascii_graphic())
            && record.offset as u64 >= HEADER_SIZE
            && record.offset as u64 + record.size as u64 <= header.dir_offset as u64
    });
    if in_data {
        Confidence::Certain
    } else {
        Confidence::None
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    for (record, name) in directory(source)? {
        source.check(record.offset as u64, record.size as u64)?;
        debug!(%name, flags = record.flags, "lump");

        let mut entry = Entry::from_source(
            name,
            Lazy::raw(source, record.offset as u64, record.size as u64),
        );
        entry.properties_mut().insert(
            FLAGS_PROPERTY.to_owned(),
            Property::Int(record.flags as i64),
        );
        root.add_entry(entry.into_ref(), None);
    }
    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let start = out.stream_position()?;
    let count = u16::try_from(root.entries().len())
        .map_err(|_| unsupported("DAT files hold at most 65535 lumps"))?;
    out.seek(SeekFrom::Current(HEADER_SIZE as i64))?;

    let mut records = Vec::with_capacity(root.entries().len());
    let mut table = Vec::new();
    for entry in root.entries() {
        let entry = entry.read();
        if entry.name().contains('\0') {
            return Err(Error::InvalidName(entry.name().to_owned()));
        }
        let data = entry.payload()?;
        let offset = offset32(out.stream_position()? - start)?;
        out.write_all(&data)?;

        let name_offset = u16::try_from(table.len())
            .map_err(|_| unsupported("DAT name table exceeds 64 KiB"))?;
        table.extend_from_slice(entry.name().as_bytes());
        table.push(0);
        let flags = entry
            .property(FLAGS_PROPERTY)
            .and_then(Property::as_int)
            .unwrap_or(0);
        records.push(DatRecord {
            offset,
            size: offset32(data.len() as u64)?,
            name_offset,
            flags: flags as u16,
        });
    }

    let dir_offset = offset32(out.stream_position()? - start)?;
    for record in &records {
        record.write(out)?;
    }
    out.write_all(&table)?;

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(start))?;
    DatHeader {
        count,
        dir_offset,
        reserved: 0,
    }
    .write(out)?;
    out.seek(SeekFrom::Start(end))?;
    Ok(())
}
