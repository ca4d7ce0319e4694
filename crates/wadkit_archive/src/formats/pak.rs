//! Quake PAK files
//!
//! `PACK`, then the directory offset and size. Each 64 byte directory record holds a 56 byte
//! NUL padded path (`maps/e1m1.bsp`), an offset and a size. Directories only exist through
//! the paths of the files inside them.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use super::{entry_paths, in_bounds, insert_at_path, name_from_bytes, name_to_bytes, offset32};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy},
    error::{malformed, Error, Result},
    sniff::Confidence,
    source::Source,
};

const HEADER_SIZE: u64 = 12;
const RECORD_SIZE: u64 = 64;
const MAX_PATH: usize = 55;

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"PACK", little)]
pub struct PakHeader {
    pub dir_offset: u32,
    pub dir_size: u32,
}

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct PakRecord {
    pub path: [u8; 56],
    pub offset: u32,
    pub size: u32,
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Ok(header) = PakHeader::read(&mut Cursor::new(data)) else {
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

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let header = PakHeader::read(&mut Cursor::new(source.slice(0, HEADER_SIZE)?))?;
    if header.dir_size as u64 % RECORD_SIZE != 0 {
        return Err(malformed(format!(
            "directory size {} is not a multiple of {RECORD_SIZE}",
            header.dir_size
        )));
    }

    let mut dir = Cursor::new(source.slice(header.dir_offset as u64, header.dir_size as u64)?);
    for _ in 0..header.dir_size as u64 / RECORD_SIZE {
        let record = PakRecord::read(&mut dir)?;
        let path = name_from_bytes(&record.path);
        source.check(record.offset as u64, record.size as u64)?;
        debug!(%path, size = record.size, "file");

        insert_at_path(root, &path, |name| {
            Entry::from_source(name, Lazy::raw(source, record.offset as u64, record.size as u64))
        });
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

    let mut header = PakHeader {
        dir_offset: 0,
        dir_size: offset32(files.len() as u64 * RECORD_SIZE)?,
    };
    header.write(out)?;

    let mut records = Vec::with_capacity(files.len());
    for (path, entry) in &files {
        let entry = entry.read();
        let data = entry.payload()?;
        records.push(PakRecord {
            path: name_to_bytes(path, true)?,
            offset: offset32(out.stream_position()? - start)?,
            size: offset32(data.len() as u64)?,
        });
        out.write_all(&data)?;
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
