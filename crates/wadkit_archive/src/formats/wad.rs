//! Doom WAD files
//!
//! | Offset | Field      | Description                               |
//! |--------|------------|-------------------------------------------|
//! | 0x00   | Kind       | 4 bytes: `IWAD` or `PWAD`                 |
//! | 0x04   | Lump count | 4 bytes: number of directory records      |
//! | 0x08   | Dir offset | 4 bytes: offset of the directory          |
//!
//! Each directory record is 16 bytes: offset, size and an 8 byte NUL padded name. The Jaguar
//! dialect in [`super::wadj`] shares the layout with big-endian integers.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite, Endian};
use tracing::{debug, instrument};

use super::{in_bounds, name_from_bytes, name_to_bytes, offset32};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy, Property},
    error::{malformed, Error, Result},
    sniff::Confidence,
    source::Source,
};

pub(crate) const HEADER_SIZE: u64 = 12;
pub(crate) const RECORD_SIZE: u64 = 16;

/// Root property holding the WAD kind (`IWAD` or `PWAD`)
pub const KIND_PROPERTY: &str = "wad_kind";

/// WAD file header
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
pub struct WadHeader {
    /// `IWAD` or `PWAD`
    pub kind: [u8; 4],

    /// Number of lumps in the directory
    pub lumps: u32,

    /// Offset of the directory from the start of the file
    pub dir_offset: u32,
}

/// WAD directory record
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
pub struct WadRecord {
    /// Offset of the lump data from the start of the file
    pub offset: u32,

    /// Size of the lump data
    pub size: u32,

    /// NUL padded lump name
    pub name: [u8; 8],
}

pub(crate) fn header_fits(data: &[u8], endian: Endian) -> Option<bool> {
    let header = data.get(..HEADER_SIZE as usize)?;
    if &header[..4] != b"IWAD" && &header[..4] != b"PWAD" {
        return None;
    }
    let header = WadHeader::read_options(&mut Cursor::new(header), endian, ()).ok()?;
    Some(in_bounds(
        data,
        header.dir_offset as u64,
        header.lumps as u64 * RECORD_SIZE,
    ))
}

/// Check for a little-endian WAD header whose directory lies inside the buffer
pub fn sniff(data: &[u8]) -> Confidence {
    match header_fits(data, Endian::Little) {
        Some(true) => Confidence::Certain,
        Some(false) => Confidence::Unlikely,
        None => Confidence::None,
    }
}

/// Read the directory of a WAD with the given integer byte order
pub(crate) fn read_records(source: &Source, endian: Endian) -> Result<(WadHeader, Vec<WadRecord>)> {
    let header_bytes = source.slice(0, HEADER_SIZE)?;
    let header = WadHeader::read_options(&mut Cursor::new(header_bytes), endian, ())?;
    if &header.kind != b"IWAD" && &header.kind != b"PWAD" {
        return Err(malformed("missing IWAD/PWAD magic"));
    }

    let dir_len = header.lumps as u64 * RECORD_SIZE;
    let mut dir = Cursor::new(source.slice(header.dir_offset as u64, dir_len)?);
    let records = (0..header.lumps)
        .map(|_| WadRecord::read_options(&mut dir, endian, ()))
        .collect::<binrw::BinResult<Vec<_>>>()?;

    Ok((header, records))
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let (header, records) = read_records(source, Endian::Little)?;
    set_kind(root, &header);

    for record in records {
        let name = name_from_bytes(&record.name);
        let offset = if record.size == 0 { 0 } else { record.offset as u64 };
        source.check(offset, record.size as u64)?;
        debug!(%name, offset, size = record.size, "lump");

        let entry = Entry::from_source(name, Lazy::raw(source, offset, record.size as u64));
        root.add_entry(entry.into_ref(), None);
    }

    Ok(())
}

pub(crate) fn set_kind(root: &mut ArchiveDir, header: &WadHeader) {
    let kind = String::from_utf8_lossy(&header.kind).into_owned();
    root.dir_entry()
        .write()
        .properties_mut()
        .insert(KIND_PROPERTY.to_owned(), Property::Text(kind));
}

pub(crate) fn kind_of(root: &ArchiveDir) -> [u8; 4] {
    let entry = root.dir_entry().read();
    match entry.property(KIND_PROPERTY).and_then(Property::as_str) {
        Some("IWAD") => *b"IWAD",
        _ => *b"PWAD",
    }
}

/// Write the lumps of `root` with the given integer byte order
///
/// `record` may adjust each directory record before it is stored.
pub(crate) fn write_with<W: Write + Seek>(
    root: &ArchiveDir,
    out: &mut W,
    endian: Endian,
    record: impl Fn(&Entry, &mut WadRecord),
) -> Result<()> {
    let start = out.stream_position()?;
    let mut header = WadHeader {
        kind: kind_of(root),
        lumps: 0,
        dir_offset: 0,
    };
    header.write_options(out, endian, ())?;

    let mut records = Vec::with_capacity(root.entries().len());
    for entry in root.entries() {
        let entry = entry.read();
        let data = entry.payload()?;
        let mut wad_record = WadRecord {
            offset: offset32(out.stream_position()? - start)?,
            size: offset32(data.len() as u64)?,
            name: name_to_bytes(entry.name(), false)?,
        };
        out.write_all(&data)?;
        record(&entry, &mut wad_record);
        records.push(wad_record);
    }

    header.lumps = u32::try_from(records.len())
        .map_err(|_| Error::UnsupportedOperation("too many lumps".to_owned()))?;
    header.dir_offset = offset32(out.stream_position()? - start)?;
    for wad_record in &records {
        wad_record.write_options(out, endian, ())?;
    }

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(start))?;
    header.write_options(out, endian, ())?;
    out.seek(SeekFrom::Start(end))?;

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    write_with(root, out, Endian::Little, |_, _| {})
}
