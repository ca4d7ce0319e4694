//! Build engine group files
//!
//! A 12 byte `KenSilverman` magic and a u32 file count, then one 16 byte record per file
//! (12 byte name, u32 size). The file data follows the directory in record order, so offsets
//! are implied.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::instrument;

use super::{name_from_bytes, name_to_bytes, offset32};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy},
    error::Result,
    sniff::Confidence,
    source::Source,
};

const HEADER_SIZE: u64 = 16;
const RECORD_SIZE: u64 = 16;

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"KenSilverman", little)]
pub struct GrpHeader {
    pub count: u32,
}

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct GrpRecord {
    pub name: [u8; 12],
    pub size: u32,
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Ok(header) = GrpHeader::read(&mut Cursor::new(data)) else {
        return Confidence::None;
    };
    let dir_end = HEADER_SIZE + header.count as u64 * RECORD_SIZE;
    if dir_end <= data.len() as u64 {
        Confidence::Certain
    } else {
        Confidence::Unlikely
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let header = GrpHeader::read(&mut Cursor::new(source.slice(0, HEADER_SIZE)?))?;
    let dir_len = header.count as u64 * RECORD_SIZE;
    let mut dir = Cursor::new(source.slice(HEADER_SIZE, dir_len)?);

    let mut offset = HEADER_SIZE + dir_len;
    for _ in 0..header.count {
        let record = GrpRecord::read(&mut dir)?;
        source.check(offset, record.size as u64)?;
        let entry = Entry::from_source(
            name_from_bytes(&record.name),
            Lazy::raw(source, offset, record.size as u64),
        );
        root.add_entry(entry.into_ref(), None);
        offset += record.size as u64;
    }

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    GrpHeader {
        count: offset32(root.entries().len() as u64)?,
    }
    .write(out)?;

    let dir_start = out.stream_position()?;
    out.seek(SeekFrom::Current(
        (root.entries().len() as u64 * RECORD_SIZE) as i64,
    ))?;

    let mut records = Vec::with_capacity(root.entries().len());
    for entry in root.entries() {
        let entry = entry.read();
        let data = entry.payload()?;
        out.write_all(&data)?;
        records.push(GrpRecord {
            name: name_to_bytes(entry.name(), false)?,
            size: offset32(data.len() as u64)?,
        });
    }

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(dir_start))?;
    for record in &records {
        record.write(out)?;
    }
    out.seek(SeekFrom::Start(end))?;

    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::{assert_eq, assert_str_eq};

    use super::{read, sniff, write};
    use crate::{
        dir::ArchiveDir, entry::Entry, error::Result, sniff::Confidence, source::Source,
    };

    #[test]
    fn write_group() -> Result<()> {
        let mut root = ArchiveDir::root(true);
        root.add_entry(Entry::with_data("E1L1.MAP", vec![0xAA, 0xBB]).into_ref(), None);

        let mut out = Cursor::new(Vec::new());
        write(&root, &mut out)?;
        let bytes = out.into_inner();

        assert_str_eq!(
            format!("{:02X?}", bytes),
            "[4B, 65, 6E, 53, 69, 6C, 76, 65, 72, 6D, 61, 6E, 01, 00, 00, 00, \
             45, 31, 4C, 31, 2E, 4D, 41, 50, 00, 00, 00, 00, 02, 00, 00, 00, AA, BB]"
        );
        assert_eq!(sniff(&bytes), Confidence::Certain);

        let mut again = ArchiveDir::root(true);
        read(&Source::from(bytes), &mut again)?;
        assert_eq!(&*again.entries()[0].write().data()?, &[0xAA, 0xBB]);

        Ok(())
    }
}
