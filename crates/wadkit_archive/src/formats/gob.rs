//! Dark Forces GOB files
//!
//! `GOB\n` and a u32 directory offset. The directory starts with a u32 count followed by
//! 21 byte records (offset, size, 13 byte NUL padded name).

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, instrument};

use super::{in_bounds, name_from_bytes, name_to_bytes, offset32, peek_u32_le};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy},
    error::Result,
    sniff::Confidence,
    source::Source,
};

const HEADER_SIZE: u64 = 8;
const RECORD_SIZE: u64 = 21;

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"GOB\n", little)]
pub struct GobHeader {
    pub dir_offset: u32,
}

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct GobRecord {
    pub offset: u32,
    pub size: u32,
    pub name: [u8; 13],
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Ok(header) = GobHeader::read(&mut Cursor::new(data)) else {
        return Confidence::None;
    };
    let dir_offset = header.dir_offset as usize;
    match peek_u32_le(data, dir_offset) {
        Some(count) if in_bounds(data, dir_offset as u64 + 4, count as u64 * RECORD_SIZE) => {
            Confidence::Certain
        }
        _ => Confidence::Unlikely,
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let header = GobHeader::read(&mut Cursor::new(source.slice(0, HEADER_SIZE)?))?;
    let count_bytes = source.slice(header.dir_offset as u64, 4)?;
    let count = Cursor::new(count_bytes).read_u32::<LittleEndian>()?;

    let mut dir = Cursor::new(source.slice(
        header.dir_offset as u64 + 4,
        count as u64 * RECORD_SIZE,
    )?);
    for _ in 0..count {
        let record = GobRecord::read(&mut dir)?;
        let name = name_from_bytes(&record.name);
        source.check(record.offset as u64, record.size as u64)?;
        debug!(%name, size = record.size, "file");

        let entry = Entry::from_source(
            name,
            Lazy::raw(source, record.offset as u64, record.size as u64),
        );
        root.add_entry(entry.into_ref(), None);
    }

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let start = out.stream_position()?;
    let mut header = GobHeader { dir_offset: 0 };
    header.write(out)?;

    let mut records = Vec::with_capacity(root.entries().len());
    for entry in root.entries() {
        let entry = entry.read();
        let data = entry.payload()?;
        records.push(GobRecord {
            offset: offset32(out.stream_position()? - start)?,
            size: offset32(data.len() as u64)?,
            name: name_to_bytes(entry.name(), true)?,
        });
        out.write_all(&data)?;
    }

    header.dir_offset = offset32(out.stream_position()? - start)?;
    out.write_u32::<LittleEndian>(offset32(records.len() as u64)?)?;
    for record in &records {
        record.write(out)?;
    }

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(start))?;
    header.write(out)?;
    out.seek(SeekFrom::Start(end))?;

    Ok(())
}
