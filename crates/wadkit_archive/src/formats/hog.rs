//! Descent HOG files
//!
//! A `DHF` magic followed by files laid end to end, each preceded by a 13 byte NUL padded name
//! and a u32 size. There is no directory; the file list is recovered by walking the chain.

use std::io::{Cursor, Seek, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use super::{name_from_bytes, name_to_bytes, offset32};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy},
    error::{malformed, Error, Result},
    sniff::Confidence,
    source::Source,
};

const MAGIC: &[u8; 3] = b"DHF";
const RECORD_SIZE: u64 = 17;

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct HogRecord {
    pub name: [u8; 13],
    pub size: u32,
}

/// Walk the chain of records, returning `(name, offset, size)` for each file
fn walk(data: &[u8]) -> Result<Vec<(String, u64, u64)>> {
    if data.get(..3) != Some(&MAGIC[..]) {
        return Err(malformed("missing DHF magic"));
    }

    let mut files = Vec::new();
    let mut offset = MAGIC.len() as u64;
    let len = data.len() as u64;
    while offset < len {
        if offset + RECORD_SIZE > len {
            return Err(Error::Truncated {
                offset,
                needed: RECORD_SIZE,
                available: len,
            });
        }
        let record = HogRecord::read(&mut Cursor::new(
            &data[offset as usize..(offset + RECORD_SIZE) as usize],
        ))?;
        let data_offset = offset + RECORD_SIZE;
        if data_offset + record.size as u64 > len {
            return Err(Error::Truncated {
                offset: data_offset,
                needed: record.size as u64,
                available: len,
            });
        }
        files.push((name_from_bytes(&record.name), data_offset, record.size as u64));
        offset = data_offset + record.size as u64;
    }

    Ok(files)
}

pub fn sniff(data: &[u8]) -> Confidence {
    if data.get(..3) != Some(&MAGIC[..]) {
        return Confidence::None;
    }
    match walk(data) {
        Ok(_) => Confidence::Certain,
        Err(_) => Confidence::Unlikely,
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    for (name, offset, size) in walk(source)? {
        debug!(%name, offset, size, "file");
        let entry = Entry::from_source(name, Lazy::raw(source, offset, size));
        root.add_entry(entry.into_ref(), None);
    }
    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    out.write_all(MAGIC)?;
    for entry in root.entries() {
        let entry = entry.read();
        let data = entry.payload()?;
        HogRecord {
            name: name_to_bytes(entry.name(), true)?,
            size: offset32(data.len() as u64)?,
        }
        .write(out)?;
        out.write_all(&data)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::{read, sniff, write};
    use crate::{
        dir::ArchiveDir, entry::Entry, error::Result, sniff::Confidence, source::Source,
    };

    #[test]
    fn chain_of_files() -> Result<()> {
        let mut root = ArchiveDir::root(true);
        root.add_entry(Entry::with_data("level01.rdl", vec![1, 2]).into_ref(), None);
        root.add_entry(Entry::with_data("empty.txt", Vec::new()).into_ref(), None);

        let mut out = Cursor::new(Vec::new());
        write(&root, &mut out)?;
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), 3 + 17 + 2 + 17);
        assert_eq!(sniff(&bytes), Confidence::Certain);
        assert_eq!(sniff(&bytes[..30]), Confidence::Unlikely);

        let mut again = ArchiveDir::root(true);
        read(&Source::from(bytes), &mut again)?;
        assert_eq!(again.entries()[1].read().name(), "empty.txt");

        Ok(())
    }
}
