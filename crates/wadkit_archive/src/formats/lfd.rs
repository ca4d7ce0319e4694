//! LucasArts LFD resource files
//!
//! Every resource is a chunk: a 16 byte header (4 byte type, 8 byte name, u32 size) followed by
//! its data. The file opens with an `RMAP` chunk whose body repeats the headers of every
//! following chunk. Entries are named `NAME.TYPE`.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument, warn};

use super::{name_from_bytes, name_to_bytes, offset32};
use crate::{
    dir::ArchiveDir,
    entry::{split_extension, Entry, Lazy},
    error::{malformed, Result},
    sniff::Confidence,
    source::Source,
};

const CHUNK_HEADER_SIZE: u64 = 16;

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct LfdChunk {
    pub kind: [u8; 4],
    pub name: [u8; 8],
    pub size: u32,
}

impl LfdChunk {
    fn for_entry(name: &str, size: u32) -> Result<Self> {
        let (stem, ext) = split_extension(name);
        Ok(LfdChunk {
            kind: name_to_bytes(ext.trim_start_matches('.'), false)?,
            name: name_to_bytes(stem, false)?,
            size,
        })
    }

    fn entry_name(&self) -> String {
        let kind = name_from_bytes(&self.kind);
        let name = name_from_bytes(&self.name);
        if kind.is_empty() {
            name
        } else {
            format!("{name}.{kind}")
        }
    }
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Some(header) = data.get(..CHUNK_HEADER_SIZE as usize) else {
        return Confidence::None;
    };
    let Ok(rmap) = LfdChunk::read(&mut Cursor::new(header)) else {
        return Confidence::None;
    };
    if &rmap.kind != b"RMAP" {
        return Confidence::None;
    }
    if rmap.size as u64 % CHUNK_HEADER_SIZE == 0
        && (CHUNK_HEADER_SIZE + rmap.size as u64) <= data.len() as u64
    {
        Confidence::Certain
    } else {
        Confidence::Unlikely
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let rmap = LfdChunk::read(&mut Cursor::new(source.slice(0, CHUNK_HEADER_SIZE)?))?;
    if &rmap.kind != b"RMAP" {
        return Err(malformed("missing RMAP chunk"));
    }
    if rmap.size as u64 % CHUNK_HEADER_SIZE != 0 {
        return Err(malformed("RMAP size is not a multiple of the chunk header size"));
    }

    let count = rmap.size as u64 / CHUNK_HEADER_SIZE;
    let mut offset = CHUNK_HEADER_SIZE + rmap.size as u64;
    for _ in 0..count {
        let chunk = LfdChunk::read(&mut Cursor::new(source.slice(offset, CHUNK_HEADER_SIZE)?))?;
        let data_offset = offset + CHUNK_HEADER_SIZE;
        source.check(data_offset, chunk.size as u64)?;

        let name = chunk.entry_name();
        debug!(%name, size = chunk.size, "chunk");
        let entry = Entry::from_source(name, Lazy::raw(source, data_offset, chunk.size as u64));
        root.add_entry(entry.into_ref(), None);
        offset = data_offset + chunk.size as u64;
    }

    if offset < source.len() as u64 {
        warn!(trailing = source.len() as u64 - offset, "data after the last mapped chunk");
    }

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let map_size = root.entries().len() as u64 * CHUNK_HEADER_SIZE;
    LfdChunk {
        kind: *b"RMAP",
        name: name_to_bytes("resource", false)?,
        size: offset32(map_size)?,
    }
    .write(out)?;

    let map_start = out.stream_position()?;
    out.seek(SeekFrom::Current(map_size as i64))?;

    let mut chunks = Vec::with_capacity(root.entries().len());
    for entry in root.entries() {
        let entry = entry.read();
        let data = entry.payload()?;
        let chunk = LfdChunk::for_entry(entry.name(), offset32(data.len() as u64)?)?;
        chunk.write(out)?;
        out.write_all(&data)?;
        chunks.push(chunk);
    }

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(map_start))?;
    for chunk in &chunks {
        chunk.write(out)?;
    }
    out.seek(SeekFrom::Start(end))?;

    Ok(())
}
