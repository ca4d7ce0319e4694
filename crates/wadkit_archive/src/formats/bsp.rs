//! Quake (version 29) and Half-Life (version 30) BSP levels
//!
//! A u32 version followed by 15 lump records (u32 offset, u32 size). Lump 2 holds the
//! embedded textures: a u32 count, one u32 offset per texture relative to the lump, then the
//! miptex blobs. Each blob starts with a 16 byte name, which becomes the entry name.
//!
//! Only the textures are exposed as entries. The root directory entry stays backed by the
//! whole file so the remaining level lumps are copied through unchanged on write; a BSP
//! built from scratch gets empty level lumps.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, instrument};

use super::{in_bounds, name_from_bytes, name_to_bytes, offset32, peek_u32_le};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy, Property},
    error::{malformed, unsupported, Result},
    sniff::Confidence,
    source::Source,
};

const LUMP_COUNT: usize = 15;
const TEXTURE_LUMP: usize = 2;
const HEADER_SIZE: u64 = 4 + LUMP_COUNT as u64 * 8;
const NAME_SIZE: usize = 16;
const MIPTEX_HEADER_SIZE: usize = 40;

/// Quake BSP version
pub const QUAKE_VERSION: u32 = 29;
/// Half-Life BSP version
pub const HALF_LIFE_VERSION: u32 = 30;

/// Root property holding the BSP version
pub const VERSION_PROPERTY: &str = "bsp_version";

#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct BspLump {
    pub offset: u32,
    pub size: u32,
}

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct BspHeader {
    pub version: u32,
    pub lumps: [BspLump; LUMP_COUNT],
}

fn valid_version(version: u32) -> bool {
    version == QUAKE_VERSION || version == HALF_LIFE_VERSION
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Some(head) = data.get(..HEADER_SIZE as usize) else {
        return Confidence::None;
    };
    let Ok(header) = BspHeader::read(&mut Cursor::new(head)) else {
        return Confidence::None;
    };
    if !valid_version(header.version) {
        return Confidence::None;
    }
    let lumps_fit = header
        .lumps
        .iter()
        .all(|lump| in_bounds(data, lump.offset as u64, lump.size as u64));
    if lumps_fit {
        Confidence::Certain
    } else {
        Confidence::Unlikely
    }
}

/// Name, offset within the lump and size of every texture in a texture lump
fn textures(lump: &[u8]) -> Result<Vec<(String, u64, u64)>> {
    if lump.is_empty() {
        return Ok(Vec::new());
    }
    let count = peek_u32_le(lump, 0).ok_or_else(|| malformed("texture lump too short"))? as u64;
    let table_end = 4 + count * 4;
    if table_end > lump.len() as u64 {
        return Err(malformed(format!("texture lump cannot hold {count} offsets")));
    }

    let offsets: Vec<i32> = (0..count as usize)
        .map(|index| LittleEndian::read_i32(&lump[4 + index * 4..]))
        .collect();
    let mut starts: Vec<u64> = offsets
        .iter()
        .filter(|offset| **offset >= 0)
        .map(|offset| *offset as u64)
        .collect();
    starts.sort_unstable();
    starts.dedup();

    let mut out = Vec::with_capacity(offsets.len());
    for (index, offset) in offsets.iter().enumerate() {
        if *offset < 0 {
            debug!(index, "missing texture");
            continue;
        }
        let start = *offset as u64;
        let end = starts
            .iter()
            .find(|other| **other > start)
            .copied()
            .map_or(lump.len() as u64, |next| next.min(lump.len() as u64));
        if start < table_end || end.saturating_sub(start) < MIPTEX_HEADER_SIZE as u64 {
            return Err(malformed(format!("texture {index} at {start} is out of place")));
        }
        let name = name_from_bytes(&lump[start as usize..start as usize + NAME_SIZE]);
        out.push((name, start, end - start));
    }
    Ok(out)
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let header = BspHeader::read(&mut Cursor::new(source.slice(0, HEADER_SIZE)?))?;
    if !valid_version(header.version) {
        return Err(malformed(format!("unknown BSP version {}", header.version)));
    }
    for lump in &header.lumps {
        source.check(lump.offset as u64, lump.size as u64)?;
    }

    {
        let mut level = root.dir_entry().write();
        level.attach(Lazy::raw(source, 0, source.len() as u64));
        level.properties_mut().insert(
            VERSION_PROPERTY.to_owned(),
            Property::Int(header.version as i64),
        );
    }

    let lump = header.lumps[TEXTURE_LUMP];
    let base = lump.offset as u64;
    for (name, offset, size) in textures(source.slice(base, lump.size as u64)?)? {
        debug!(%name, size, "texture");
        let entry = Entry::from_source(name, Lazy::raw(source, base + offset, size));
        root.add_entry(entry.into_ref(), None);
    }
    Ok(())
}

/// Serialize the entries as a texture lump
///
/// The name field of each blob is rewritten when the entry was renamed.
fn texture_lump(root: &ArchiveDir) -> Result<Vec<u8>> {
    let count = root.entries().len();
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut lump = vec![0u8; 4 + count * 4];
    LittleEndian::write_u32(&mut lump[..4], offset32(count as u64)?);

    for (index, entry) in root.entries().iter().enumerate() {
        let entry = entry.read();
        let data = entry.payload()?;
        if data.len() < MIPTEX_HEADER_SIZE {
            return Err(unsupported(format!(
                "{} is too short to be a miptex",
                entry.name()
            )));
        }
        let offset = offset32(lump.len() as u64)?;
        LittleEndian::write_u32(&mut lump[4 + index * 4..8 + index * 4], offset);

        if name_from_bytes(&data[..NAME_SIZE]) == entry.name() {
            lump.extend_from_slice(&data);
        } else {
            lump.extend_from_slice(&name_to_bytes::<NAME_SIZE>(entry.name(), true)?);
            lump.extend_from_slice(&data[NAME_SIZE..]);
        }
    }
    Ok(lump)
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let start = out.stream_position()?;
    let dir_entry = root.dir_entry().read();
    let version = dir_entry
        .property(VERSION_PROPERTY)
        .and_then(Property::as_int)
        .map_or(QUAKE_VERSION, |version| version as u32);
    if !valid_version(version) {
        return Err(unsupported(format!("cannot write BSP version {version}")));
    }

    let level = dir_entry.payload()?;
    let previous = if level.is_empty() {
        None
    } else {
        Some(BspHeader::read(&mut Cursor::new(&level[..]))?)
    };

    out.seek(SeekFrom::Current(HEADER_SIZE as i64))?;
    let mut lumps = [BspLump::default(); LUMP_COUNT];
    for (index, record) in lumps.iter_mut().enumerate() {
        let position = out.stream_position()? - start;
        let padding = (4 - position % 4) % 4;
        out.write_all(&[0u8; 3][..padding as usize])?;
        let offset = offset32(position + padding)?;

        let size = if index == TEXTURE_LUMP {
            let lump = texture_lump(root)?;
            out.write_all(&lump)?;
            lump.len()
        } else if let Some(previous) = &previous {
            let old = previous.lumps[index];
            let end = old.offset as usize + old.size as usize;
            let bytes = level
                .get(old.offset as usize..end)
                .ok_or_else(|| malformed(format!("level lump {index} is out of bounds")))?;
            out.write_all(bytes)?;
            bytes.len()
        } else {
            0
        };
        *record = BspLump {
            offset,
            size: offset32(size as u64)?,
        };
    }

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(start))?;
    BspHeader { version, lumps }.write(out)?;
    out.seek(SeekFrom::Start(end))?;
    Ok(())
}
