//! Quake WAD2 and Half-Life WAD3 texture wads
//!
//! | Offset | Field      | Description                    |
//! |--------|------------|--------------------------------|
//! | 0x00   | Magic      | 4 bytes: `WAD2` or `WAD3`      |
//! | 0x04   | Count      | 4 bytes: number of records     |
//! | 0x08   | Dir offset | 4 bytes: offset of directory   |
//!
//! Directory records are 32 bytes and carry a lump type byte, kept as the `lump_type` entry
//! property. The compression byte was never used by the games; entries that set it load as
//! unsupported.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use super::{in_bounds, name_from_bytes, name_to_bytes, offset32};
use crate::{
    dir::ArchiveDir,
    entry::{Encoding, Entry, Lazy, Property},
    error::{malformed, Result},
    sniff::Confidence,
    source::Source,
};

const HEADER_SIZE: u64 = 12;
const RECORD_SIZE: u64 = 32;

/// Entry property holding the lump type byte
pub const LUMP_TYPE_PROPERTY: &str = "lump_type";

/// Root property holding the magic (`WAD2` or `WAD3`)
pub const VERSION_PROPERTY: &str = "wad_kind";

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct Wad2Header {
    pub magic: [u8; 4],
    pub count: u32,
    pub dir_offset: u32,
}

#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct Wad2Record {
    pub offset: u32,
    pub disk_size: u32,
    pub size: u32,
    pub lump_type: u8,
    pub compression: u8,
    pub padding: u16,
    pub name: [u8; 16],
}

fn valid_magic(magic: &[u8]) -> bool {
    magic == b"WAD2" || magic == b"WAD3"
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Some(header) = data.get(..HEADER_SIZE as usize) else {
        return Confidence::None;
    };
    if !valid_magic(&header[..4]) {
        return Confidence::None;
    }
    match Wad2Header::read(&mut Cursor::new(header)) {
        Ok(header)
            if in_bounds(
                data,
                header.dir_offset as u64,
                header.count as u64 * RECORD_SIZE,
            ) =>
        {
            Confidence::Certain
        }
        _ => Confidence::Unlikely,
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let header = Wad2Header::read(&mut Cursor::new(source.slice(0, HEADER_SIZE)?))?;
    if !valid_magic(&header.magic) {
        return Err(malformed("missing WAD2/WAD3 magic"));
    }
    root.dir_entry().write().properties_mut().insert(
        VERSION_PROPERTY.to_owned(),
        Property::Text(String::from_utf8_lossy(&header.magic).into_owned()),
    );

    let mut dir = Cursor::new(source.slice(
        header.dir_offset as u64,
        header.count as u64 * RECORD_SIZE,
    )?);
    for _ in 0..header.count {
        let record = Wad2Record::read(&mut dir)?;
        let name = name_from_bytes(&record.name);
        source.check(record.offset as u64, record.disk_size as u64)?;
        debug!(%name, lump_type = record.lump_type, "lump");

        let mut lazy = Lazy::raw(source, record.offset as u64, record.disk_size as u64);
        if record.compression != 0 {
            lazy = lazy.with_encoding(Encoding::Unsupported(record.compression as u16));
        }
        let mut entry = Entry::from_source(name, lazy);
        entry.properties_mut().insert(
            LUMP_TYPE_PROPERTY.to_owned(),
            Property::Int(record.lump_type as i64),
        );
        root.add_entry(entry.into_ref(), None);
    }

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let start = out.stream_position()?;
    let magic = match root
        .dir_entry()
        .read()
        .property(VERSION_PROPERTY)
        .and_then(Property::as_str)
    {
        Some("WAD3") => *b"WAD3",
        _ => *b"WAD2",
    };
    let mut header = Wad2Header {
        magic,
        count: 0,
        dir_offset: 0,
    };
    header.write(out)?;

    let mut records = Vec::with_capacity(root.entries().len());
    for entry in root.entries() {
        let entry = entry.read();
        let data = entry.payload()?;
        let size = offset32(data.len() as u64)?;
        records.push(Wad2Record {
            offset: offset32(out.stream_position()? - start)?,
            disk_size: size,
            size,
            lump_type: entry
                .property(LUMP_TYPE_PROPERTY)
                .and_then(Property::as_int)
                .and_then(|t| u8::try_from(t).ok())
                .unwrap_or_default(),
            name: name_to_bytes(entry.name(), true)?,
            ..Default::default()
        });
        out.write_all(&data)?;
    }

    header.count = offset32(records.len() as u64)?;
    header.dir_offset = offset32(out.stream_position()? - start)?;
    for record in &records {
        record.write(out)?;
    }

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(start))?;
    header.write(out)?;
    out.seek(SeekFrom::Start(end))?;

    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinRead;
    use pretty_assertions::assert_eq;

    use super::{read, write, Wad2Record, LUMP_TYPE_PROPERTY};
    use crate::{
        dir::ArchiveDir,
        entry::{Entry, Property},
        error::Result,
        source::Source,
    };

    #[test]
    fn read_record() -> Result<()> {
        #[rustfmt::skip]
        let mut input = Cursor::new(vec![
            0x0C, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00,
            0x44, 0x00, 0x00, 0x00,
            0x57, 0x41, 0x4C, 0x4C, 0x31, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);

        let record = Wad2Record::read(&mut input)?;
        assert_eq!(record.offset, 12);
        assert_eq!(record.lump_type, 0x44);
        assert_eq!(&record.name[..6], b"WALL1\0");

        Ok(())
    }

    #[test]
    fn lump_types_survive() -> Result<()> {
        let mut root = ArchiveDir::root(true);
        let mut entry = Entry::with_data("WALL1", vec![1, 2, 3, 4]);
        entry.set_property(LUMP_TYPE_PROPERTY, 0x44i64);
        root.add_entry(entry.into_ref(), None);

        let mut out = Cursor::new(Vec::new());
        write(&root, &mut out)?;

        let mut again = ArchiveDir::root(true);
        read(&Source::from(out.into_inner()), &mut again)?;
        let entry = again.entries()[0].read();
        assert_eq!(entry.name(), "WALL1");
        assert_eq!(entry.property(LUMP_TYPE_PROPERTY), Some(&Property::Int(0x44)));

        Ok(())
    }
}
