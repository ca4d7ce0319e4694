//! Amulets & Armor RES files
//!
//! | Offset | Field      | Description                          |
//! |--------|------------|--------------------------------------|
//! | 0x00   | Magic      | 4 bytes: `Res!`                      |
//! | 0x04   | Dir offset | 4 bytes: offset of the root table    |
//! | 0x08   | Dir size   | 4 bytes: size of the root table      |
//!
//! A table is a run of 39 byte records. Records flagged as directories point at another
//! table (offset and size of the nested table) instead of file data, so the layout nests
//! arbitrarily. Names are limited to 14 bytes per path component.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use super::{in_bounds, name_from_bytes, name_to_bytes, offset32};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy},
    error::{malformed, Result},
    sniff::Confidence,
    source::Source,
};

const HEADER_SIZE: u64 = 12;
const RECORD_SIZE: u64 = 39;
const MAX_DEPTH: usize = 64;

/// Record flag of nested tables
pub const DIR_FLAG: u8 = 0x01;

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"Res!", little)]
pub struct ResHeader {
    pub dir_offset: u32,
    pub dir_size: u32,
}

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct ResRecord {
    pub name: [u8; 14],
    pub offset: u32,
    pub size: u32,
    pub flags: u8,
    pub reserved: [u8; 16],
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Ok(header) = ResHeader::read(&mut Cursor::new(data)) else {
        return Confidence::None;
    };
    if header.dir_size as u64 % RECORD_SIZE == 0
        && in_bounds(data, header.dir_offset as u64, header.dir_size as u64)
    {
        Confidence::Certain
    } else {
        Confidence::Unlikely
    }
}

fn read_table(
    source: &Source,
    dir: &mut ArchiveDir,
    offset: u64,
    size: u64,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(malformed("RES tables nest too deeply"));
    }
    if size % RECORD_SIZE != 0 {
        return Err(malformed(format!("RES table size {size} is not a whole record count")));
    }

    let mut table = Cursor::new(source.slice(offset, size)?);
    for _ in 0..size / RECORD_SIZE {
        let record = ResRecord::read(&mut table)?;
        let name = name_from_bytes(&record.name);
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(malformed(format!("bad RES record name {name:?}")));
        }

        if record.flags & DIR_FLAG != 0 {
            debug!(%name, depth, "directory");
            let sub = dir.ensure_subdir_path(&name);
            read_table(source, sub, record.offset as u64, record.size as u64, depth + 1)?;
        } else {
            source.check(record.offset as u64, record.size as u64)?;
            let entry = Entry::from_source(
                name,
                Lazy::raw(source, record.offset as u64, record.size as u64),
            );
            dir.add_entry(entry.into_ref(), None);
        }
    }
    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let header = ResHeader::read(&mut Cursor::new(source.slice(0, HEADER_SIZE)?))?;
    read_table(
        source,
        root,
        header.dir_offset as u64,
        header.dir_size as u64,
        0,
    )
}

fn record(name: &str, offset: u32, size: u32, flags: u8) -> Result<ResRecord> {
    Ok(ResRecord {
        name: name_to_bytes(name, false)?,
        offset,
        size,
        flags,
        reserved: [0; 16],
    })
}

/// Write the data of `dir` and everything below it, then its table
///
/// Returns the offset and size of the table.
fn write_table<W: Write + Seek>(dir: &ArchiveDir, out: &mut W, start: u64) -> Result<(u32, u32)> {
    let mut records = Vec::with_capacity(dir.entries().len() + dir.subdirs().len());
    for entry in dir.entries() {
        let entry = entry.read();
        let data = entry.payload()?;
        let offset = offset32(out.stream_position()? - start)?;
        out.write_all(&data)?;
        records.push(record(entry.name(), offset, offset32(data.len() as u64)?, 0)?);
    }
    for sub in dir.subdirs() {
        let (offset, size) = write_table(sub, out, start)?;
        records.push(record(&sub.name(), offset, size, DIR_FLAG)?);
    }

    let offset = offset32(out.stream_position()? - start)?;
    for record in &records {
        record.write(out)?;
    }
    Ok((offset, offset32(records.len() as u64 * RECORD_SIZE)?))
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let start = out.stream_position()?;
    out.seek(SeekFrom::Current(HEADER_SIZE as i64))?;

    let (dir_offset, dir_size) = write_table(root, out, start)?;

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(start))?;
    ResHeader {
        dir_offset,
        dir_size,
    }
    .write(out)?;
    out.seek(SeekFrom::Start(end))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinWrite;
    use pretty_assertions::assert_eq;

    use super::{read, sniff, write, ResHeader, ResRecord, DIR_FLAG, RECORD_SIZE};
    use crate::{
        dir::ArchiveDir, entry::Entry, error::Result, sniff::Confidence, source::Source,
    };

    #[test]
    fn nested_tables() -> Result<()> {
        let mut root = ArchiveDir::root(false);
        root.add_entry(Entry::with_data("TITLE.PIC", vec![1, 2, 3]).into_ref(), None);
        root.ensure_subdir_path("SOUNDS/EMPTY");
        root.ensure_subdir_path("SOUNDS")
            .add_entry(Entry::with_data("DOOR.WAV", vec![4, 5]).into_ref(), None);

        let mut out = Cursor::new(Vec::new());
        write(&root, &mut out)?;
        let bytes = out.into_inner();
        assert_eq!(&bytes[..4], b"Res!");
        assert_eq!(sniff(&bytes), Confidence::Certain);

        let mut again = ArchiveDir::root(false);
        read(&Source::from(bytes), &mut again)?;
        assert_eq!(again.entries()[0].read().name(), "TITLE.PIC");
        assert_eq!(&*again.entries()[0].write().data()?, &[1, 2, 3]);
        let sounds = again.dir_at_path("SOUNDS").expect("sounds");
        assert_eq!(&*sounds.entries()[0].write().data()?, &[4, 5]);
        assert!(again.dir_at_path("SOUNDS/EMPTY").is_some());
        Ok(())
    }

    #[test]
    fn self_referencing_table_is_rejected() -> Result<()> {
        // the only record is a directory pointing back at the root table
        let mut out = Cursor::new(Vec::new());
        ResHeader {
            dir_offset: 12,
            dir_size: RECORD_SIZE as u32,
        }
        .write(&mut out)?;
        ResRecord {
            name: *b"LOOP\0\0\0\0\0\0\0\0\0\0",
            offset: 12,
            size: RECORD_SIZE as u32,
            flags: DIR_FLAG,
            reserved: [0; 16],
        }
        .write(&mut out)?;

        let mut root = ArchiveDir::root(false);
        assert!(read(&Source::from(out.into_inner()), &mut root).is_err());
        Ok(())
    }

    #[test]
    fn bad_magic() {
        assert_eq!(sniff(b"Res?\0\0\0\0\0\0\0\0"), Confidence::None);
        assert_eq!(sniff(b"Res!\xFF\0\0\0\x27\0\0\0"), Confidence::Unlikely);
    }
}
