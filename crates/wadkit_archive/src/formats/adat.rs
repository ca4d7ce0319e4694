//! Anachronox DAT files
//!
//! | Offset | Field      | Description                        |
//! |--------|------------|------------------------------------|
//! | 0x00   | Magic      | 4 bytes: `ADAT`                    |
//! | 0x04   | Dir offset | 4 bytes                            |
//! | 0x08   | Dir size   | 4 bytes: 144 bytes per record      |
//! | 0x0C   | Version    | 4 bytes: always 9                  |
//!
//! Records carry a 128 byte path, offset, decompressed size, stored size and an unused field.
//! Payloads are zlib streams whenever the stored size differs from the decompressed one.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use super::{entry_paths, in_bounds, insert_at_path, name_from_bytes, name_to_bytes, offset32};
use crate::{
    compression::{compress, CompressionMethod},
    dir::ArchiveDir,
    entry::{Encoding, Entry, Lazy},
    error::{malformed, Error, Result},
    sniff::Confidence,
    source::Source,
};

const HEADER_SIZE: u64 = 16;
const RECORD_SIZE: u64 = 144;
const VERSION: u32 = 9;
const MAX_PATH: usize = 127;

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"ADAT", little)]
pub struct AdatHeader {
    pub dir_offset: u32,
    pub dir_size: u32,
    pub version: u32,
}

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct AdatRecord {
    pub path: [u8; 128],
    pub offset: u32,
    pub size: u32,
    pub packed_size: u32,
    pub extra: u32,
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Ok(header) = AdatHeader::read(&mut Cursor::new(data)) else {
        return Confidence::None;
    };
    if header.version == VERSION
        && header.dir_size as u64 % RECORD_SIZE == 0
        && in_bounds(data, header.dir_offset as u64, header.dir_size as u64)
    {
        Confidence::Certain
    } else {
        Confidence::Unlikely
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let header = AdatHeader::read(&mut Cursor::new(source.slice(0, HEADER_SIZE)?))?;
    if header.version != VERSION {
        return Err(malformed(format!("unknown ADAT version {}", header.version)));
    }
    if header.dir_size as u64 % RECORD_SIZE != 0 {
        return Err(malformed("directory size is not a whole number of records"));
    }

    let mut dir = Cursor::new(source.slice(header.dir_offset as u64, header.dir_size as u64)?);
    for _ in 0..header.dir_size as u64 / RECORD_SIZE {
        let record = AdatRecord::read(&mut dir)?;
        let path = name_from_bytes(&record.path);
        source.check(record.offset as u64, record.packed_size as u64)?;
        debug!(%path, size = record.size, packed = record.packed_size, "file");

        let mut lazy = Lazy::raw(source, record.offset as u64, record.packed_size as u64);
        if record.packed_size != record.size {
            lazy = lazy.with_encoding(Encoding::Compressed {
                method: CompressionMethod::Zlib,
                size: record.size as u64,
            });
        }
        insert_at_path(root, &path, |name| Entry::from_source(name, lazy));
    }

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let start = out.stream_position()?;
    let files = entry_paths(root);
    if let Some((path, _)) = files.iter().find(|(path, _)| path.len() > MAX_PATH) {
        return Err(Error::InvalidName(path.clone()));
    }

    let mut header = AdatHeader {
        dir_offset: 0,
        dir_size: offset32(files.len() as u64 * RECORD_SIZE)?,
        version: VERSION,
    };
    header.write(out)?;

    let mut records = Vec::with_capacity(files.len());
    for (path, entry) in &files {
        let entry = entry.read();
        let data = entry.payload()?;
        let packed = compress(&data, CompressionMethod::Zlib)?;
        let stored: &[u8] = if packed.len() < data.len() { &packed } else { &data };

        records.push(AdatRecord {
            path: name_to_bytes(path, true)?,
            offset: offset32(out.stream_position()? - start)?,
            size: offset32(data.len() as u64)?,
            packed_size: offset32(stored.len() as u64)?,
            extra: 0,
        });
        out.write_all(stored)?;
    }

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

    use pretty_assertions::assert_eq;

    use super::{read, sniff, write};
    use crate::{
        dir::ArchiveDir, entry::Entry, error::Result, sniff::Confidence, source::Source,
    };

    #[test]
    fn compressible_payloads_are_packed() -> Result<()> {
        let mut root = ArchiveDir::root(false);
        root.ensure_subdir_path("scripts")
            .add_entry(Entry::with_data("intro.apl", vec![b'a'; 4096]).into_ref(), None);
        root.add_entry(Entry::with_data("x", vec![1]).into_ref(), None);

        let mut out = Cursor::new(Vec::new());
        write(&root, &mut out)?;
        let bytes = out.into_inner();
        assert!(bytes.len() < 4096);
        assert_eq!(sniff(&bytes), Confidence::Certain);

        let mut again = ArchiveDir::root(false);
        read(&Source::from(bytes), &mut again)?;
        let scripts = again.subdir("scripts").expect("scripts directory");
        let entry = scripts.entries()[0].clone();
        assert_eq!(entry.read().size(), 4096);
        assert_eq!(&*entry.write().data()?, vec![b'a'; 4096].as_slice());
        assert_eq!(&*again.entries()[0].write().data()?, &[1]);

        Ok(())
    }
}
