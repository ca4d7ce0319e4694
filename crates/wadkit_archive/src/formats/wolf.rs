//! Wolfenstein 3D VSWAP page files
//!
//! | Offset | Field        | Description                        |
//! |--------|--------------|------------------------------------|
//! | 0x00   | Count        | 2 bytes: number of chunks          |
//! | 0x02   | Sprite start | 2 bytes: index of the first sprite |
//! | 0x04   | Sound start  | 2 bytes: index of the first sound  |
//! | 0x06   | Offsets      | 4 bytes per chunk                  |
//! | ...    | Lengths      | 2 bytes per chunk                  |
//!
//! Chunks carry no names. Entries are named after their section and position (`WAL00000`,
//! `SPR00000`, `SND00000`); on write the name prefix picks the section, the digits are
//! regenerated, and the sections must appear in wall, sprite, sound order. A zero offset
//! marks an empty chunk.

use std::io::{Seek, SeekFrom, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use tracing::{debug, instrument};

use super::offset32;
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy},
    error::{malformed, unsupported, Error, Result},
    sniff::Confidence,
    source::Source,
};

const PREFIX_SIZE: u64 = 6;

/// Chunk section, in file order
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Wall,
    Sprite,
    Sound,
}

impl Section {
    /// Name prefix of chunks in the section
    pub fn prefix(self) -> &'static str {
        match self {
            Section::Wall => "WAL",
            Section::Sprite => "SPR",
            Section::Sound => "SND",
        }
    }

    fn of_name(name: &str) -> Option<Self> {
        let prefix = name.get(..3)?;
        [Section::Wall, Section::Sprite, Section::Sound]
            .into_iter()
            .find(|section| section.prefix().eq_ignore_ascii_case(prefix))
    }
}

/// Parsed chunk table
struct Table {
    sprite_start: u16,
    sound_start: u16,
    chunks: Vec<(u32, u16)>,
}

impl Table {
    fn parse(data: &[u8]) -> Result<Self> {
        let prefix = data
            .get(..PREFIX_SIZE as usize)
            .ok_or_else(|| truncated(0, PREFIX_SIZE, data))?;
        let count = LittleEndian::read_u16(&prefix[0..2]);
        let sprite_start = LittleEndian::read_u16(&prefix[2..4]);
        let sound_start = LittleEndian::read_u16(&prefix[4..6]);
        if sprite_start > sound_start || sound_start > count {
            return Err(malformed(format!(
                "section starts {sprite_start}/{sound_start} do not fit {count} chunks"
            )));
        }

        let table_len = count as u64 * 6;
        let table = data
            .get(PREFIX_SIZE as usize..(PREFIX_SIZE + table_len) as usize)
            .ok_or_else(|| truncated(PREFIX_SIZE, table_len, data))?;
        let (offsets, lengths) = table.split_at(count as usize * 4);
        let chunks = (0..count as usize)
            .map(|index| {
                (
                    LittleEndian::read_u32(&offsets[index * 4..]),
                    LittleEndian::read_u16(&lengths[index * 2..]),
                )
            })
            .collect();
        Ok(Table {
            sprite_start,
            sound_start,
            chunks,
        })
    }

    fn data_start(&self) -> u64 {
        PREFIX_SIZE + self.chunks.len() as u64 * 6
    }

    fn section(&self, index: usize) -> Section {
        if index < self.sprite_start as usize {
            Section::Wall
        } else if index < self.sound_start as usize {
            Section::Sprite
        } else {
            Section::Sound
        }
    }
}

fn truncated(offset: u64, needed: u64, data: &[u8]) -> Error {
    Error::Truncated {
        offset,
        needed,
        available: data.len() as u64,
    }
}

/// The positional name of chunk `index` within `section`
pub fn chunk_name(section: Section, index: usize) -> String {
    format!("{}{index:05}", section.prefix())
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Ok(table) = Table::parse(data) else {
        return Confidence::None;
    };
    if table.chunks.is_empty() {
        return Confidence::None;
    }
    let data_start = table.data_start();
    let chunks_fit = table.chunks.iter().all(|(offset, length)| {
        (*offset == 0 && *length == 0)
            || (*offset as u64 >= data_start
                && *offset as u64 + *length as u64 <= data.len() as u64)
    });
    if chunks_fit {
        Confidence::Certain
    } else {
        Confidence::None
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let table = Table::parse(source)?;
    let mut section_index = 0;
    let mut previous = Section::Wall;
    for (index, (offset, length)) in table.chunks.iter().enumerate() {
        let section = table.section(index);
        if section != previous {
            previous = section;
            section_index = 0;
        }
        let name = chunk_name(section, section_index);
        section_index += 1;

        let entry = if *offset == 0 {
            debug!(%name, "empty chunk");
            Entry::loaded(name, Vec::new())
        } else {
            source.check(*offset as u64, *length as u64)?;
            Entry::from_source(name, Lazy::raw(source, *offset as u64, *length as u64))
        };
        root.add_entry(entry.into_ref(), None);
    }
    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let start = out.stream_position()?;
    let count = u16::try_from(root.entries().len())
        .map_err(|_| unsupported("VSWAP files hold at most 65535 chunks"))?;

    let mut sections = Vec::with_capacity(root.entries().len());
    for entry in root.entries() {
        let entry = entry.read();
        let section =
            Section::of_name(entry.name()).ok_or_else(|| Error::InvalidName(entry.name().to_owned()))?;
        if sections.last().is_some_and(|last| *last > section) {
            return Err(unsupported(format!(
                "{} is out of section order; chunks go walls, sprites, sounds",
                entry.name()
            )));
        }
        sections.push(section);
    }
    let first = |wanted: Section| {
        sections
            .iter()
            .position(|section| *section >= wanted)
            .unwrap_or(sections.len()) as u16
    };

    out.write_u16::<LittleEndian>(count)?;
    out.write_u16::<LittleEndian>(first(Section::Sprite))?;
    out.write_u16::<LittleEndian>(first(Section::Sound))?;
    let table_start = out.stream_position()?;
    out.seek(SeekFrom::Current(count as i64 * 6))?;

    let mut chunks = Vec::with_capacity(root.entries().len());
    for entry in root.entries() {
        let entry = entry.read();
        let data = entry.payload()?;
        let length = u16::try_from(data.len())
            .map_err(|_| unsupported(format!("{} is larger than a VSWAP chunk", entry.name())))?;
        if data.is_empty() {
            chunks.push((0, 0));
            continue;
        }
        let offset = offset32(out.stream_position()? - start)?;
        out.write_all(&data)?;
        chunks.push((offset, length));
    }

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(table_start))?;
    for (offset, _) in &chunks {
        out.write_u32::<LittleEndian>(*offset)?;
    }
    for (_, length) in &chunks {
        out.write_u16::<LittleEndian>(*length)?;
    }
    out.seek(SeekFrom::Start(end))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::{assert_eq, assert_str_eq};

    use super::{chunk_name, read, sniff, write, Section};
    use crate::{
        dir::ArchiveDir, entry::Entry, error::Result, sniff::Confidence, source::Source,
    };

    #[test]
    fn write_pages() -> Result<()> {
        let mut root = ArchiveDir::root(true);
        root.add_entry(Entry::with_data("WAL00000", vec![0xAA]).into_ref(), None);
        root.add_entry(Entry::new("SPR00000").into_ref(), None);
        root.add_entry(Entry::with_data("SND00000", vec![0xBB, 0xCC]).into_ref(), None);

        let mut out = Cursor::new(Vec::new());
        write(&root, &mut out)?;
        let bytes = out.into_inner();

        assert_str_eq!(
            format!("{:02X?}", bytes),
            "[03, 00, 01, 00, 02, 00, \
             18, 00, 00, 00, 00, 00, 00, 00, 19, 00, 00, 00, \
             01, 00, 00, 00, 02, 00, AA, BB, CC]"
        );
        assert_eq!(sniff(&bytes), Confidence::Certain);

        let mut again = ArchiveDir::root(true);
        read(&Source::from(bytes), &mut again)?;
        let names: Vec<String> = again
            .entries()
            .iter()
            .map(|entry| entry.read().name().to_owned())
            .collect();
        assert_eq!(names, ["WAL00000", "SPR00000", "SND00000"]);
        assert!(again.entries()[1].write().data()?.is_empty());
        assert_eq!(&*again.entries()[2].write().data()?, &[0xBB, 0xCC]);
        Ok(())
    }

    #[test]
    fn sections_must_stay_ordered() {
        let mut root = ArchiveDir::root(true);
        root.add_entry(Entry::with_data("SND00000", vec![1]).into_ref(), None);
        root.add_entry(Entry::with_data("WAL00000", vec![2]).into_ref(), None);
        assert!(write(&root, &mut Cursor::new(Vec::new())).is_err());

        let mut unnamed = ArchiveDir::root(true);
        unnamed.add_entry(Entry::with_data("DOOR", vec![1]).into_ref(), None);
        assert!(write(&unnamed, &mut Cursor::new(Vec::new())).is_err());
    }

    #[test]
    fn names_follow_position() {
        assert_eq!(chunk_name(Section::Sprite, 12), "SPR00012");
        assert_eq!(sniff(&[3, 0, 2, 0, 1, 0]), Confidence::None);
    }
}
