//! Jaguar Doom WAD files
//!
//! Same layout as a regular WAD but with big-endian integers. A set high bit on the first
//! name byte marks a packed lump; its size field then holds the unpacked size, and the stored
//! length runs up to the next lump (or the directory). Packed lumps are kept as they are
//! stored, flagged with the `packed` property.

use std::io::{Seek, Write};

use binrw::Endian;
use tracing::{debug, instrument};

use super::{
    name_from_bytes,
    wad::{self, header_fits},
};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy, Property},
    error::Result,
    sniff::Confidence,
    source::Source,
};

/// Entry property set on packed lumps
pub const PACKED_PROPERTY: &str = "packed";

/// Entry property holding the unpacked size of a packed lump
pub const UNPACKED_SIZE_PROPERTY: &str = "unpacked_size";

/// Check for a big-endian WAD header whose directory lies inside the buffer
pub fn sniff(data: &[u8]) -> Confidence {
    match (
        header_fits(data, Endian::Big),
        header_fits(data, Endian::Little),
    ) {
        (Some(true), Some(false)) => Confidence::Certain,
        (Some(true), _) => Confidence::Unlikely,
        _ => Confidence::None,
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let (header, records) = wad::read_records(source, Endian::Big)?;
    wad::set_kind(root, &header);

    let mut boundaries: Vec<u64> = records.iter().map(|r| r.offset as u64).collect();
    boundaries.push(header.dir_offset as u64);
    boundaries.sort_unstable();

    for record in records {
        let packed = record.name[0] & 0x80 != 0;
        let mut raw_name = record.name;
        raw_name[0] &= 0x7F;
        let name = name_from_bytes(&raw_name);

        let offset = record.offset as u64;
        let length = if packed {
            let next = boundaries
                .iter()
                .copied()
                .find(|boundary| *boundary > offset)
                .unwrap_or(source.len() as u64);
            next - offset
        } else if record.size == 0 {
            0
        } else {
            record.size as u64
        };
        let offset = if length == 0 { 0 } else { offset };
        source.check(offset, length)?;
        debug!(%name, offset, length, packed, "lump");

        let mut entry = Entry::from_source(name, Lazy::raw(source, offset, length));
        if packed {
            let properties = entry.properties_mut();
            properties.insert(PACKED_PROPERTY.to_owned(), Property::Bool(true));
            properties.insert(
                UNPACKED_SIZE_PROPERTY.to_owned(),
                Property::Int(record.size as i64),
            );
        }
        root.add_entry(entry.into_ref(), None);
    }

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    wad::write_with(root, out, Endian::Big, |entry, record| {
        if entry.property(PACKED_PROPERTY).and_then(Property::as_bool) == Some(true) {
            record.name[0] |= 0x80;
            if let Some(size) = entry
                .property(UNPACKED_SIZE_PROPERTY)
                .and_then(Property::as_int)
                .and_then(|size| u32::try_from(size).ok())
            {
                record.size = size;
            }
        }
    })
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::{read, sniff, write, PACKED_PROPERTY, UNPACKED_SIZE_PROPERTY};
    use crate::{
        dir::ArchiveDir,
        entry::Property,
        error::Result,
        formats::wad,
        sniff::Confidence,
        source::Source,
    };

    #[rustfmt::skip]
    const JAGUAR_WAD: [u8; 47] = [
        0x49, 0x57, 0x41, 0x44,
        0x00, 0x00, 0x00, 0x02,
        0x00, 0x00, 0x00, 0x0F,
        0x01, 0x02,
        0x03,
        0x00, 0x00, 0x00, 0x0C,
        0x00, 0x00, 0x00, 0x08,
        0xD0, 0x4C, 0x41, 0x59, 0x50, 0x41, 0x4C, 0x00,
        0x00, 0x00, 0x00, 0x0E,
        0x00, 0x00, 0x00, 0x01,
        0x43, 0x4F, 0x4C, 0x4F, 0x52, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn packed_lumps() -> Result<()> {
        let source = Source::from(JAGUAR_WAD.to_vec());
        let mut root = ArchiveDir::root(true);
        read(&source, &mut root)?;

        let packed = root.entries()[0].clone();
        {
            let mut packed = packed.write();
            assert_eq!(packed.name(), "PLAYPAL");
            assert_eq!(packed.property(PACKED_PROPERTY), Some(&Property::Bool(true)));
            assert_eq!(packed.property(UNPACKED_SIZE_PROPERTY), Some(&Property::Int(8)));
            assert_eq!(&*packed.data()?, &[0x01, 0x02]);
        }
        assert_eq!(&*root.entries()[1].write().data()?, &[0x03]);

        let mut out = Cursor::new(Vec::new());
        write(&root, &mut out)?;
        assert_eq!(out.into_inner(), JAGUAR_WAD.to_vec());

        Ok(())
    }

    #[test]
    fn sniffing_tells_byte_orders_apart() {
        assert_eq!(sniff(&JAGUAR_WAD), Confidence::Certain);
        assert_eq!(wad::sniff(&JAGUAR_WAD), Confidence::Unlikely);
    }
}
