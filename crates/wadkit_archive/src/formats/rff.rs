//! Blood RFF resource files
//!
//! | Offset | Field      | Description                         |
//! |--------|------------|-------------------------------------|
//! | 0x00   | Magic      | 4 bytes: `RFF\x1a`                  |
//! | 0x04   | Version    | 2 bytes: `0x0200`, `0x0300`, `0x0301` |
//! | 0x06   | Padding    | 2 bytes                             |
//! | 0x08   | Dir offset | 4 bytes                             |
//! | 0x0C   | Count      | 4 bytes: number of records          |
//! | 0x10   | Padding    | 16 bytes                            |
//!
//! The directory holds 48 byte records. Version `0x0301` encrypts it with a rolling XOR keyed
//! by the directory offset. Records flagged `0x10` have the first 256 bytes of their payload
//! encrypted the same way with a zero key.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use super::{in_bounds, name_from_bytes, name_to_bytes, offset32};
use crate::{
    dir::ArchiveDir,
    entry::{split_extension, Encoding, Entry, Lazy, Property},
    error::Result,
    sniff::Confidence,
    source::Source,
};

const HEADER_SIZE: u64 = 32;
const RECORD_SIZE: u64 = 48;
const ENCRYPTED_DIR_VERSION: u16 = 0x0301;
const FLAG_ENCRYPTED: u8 = 0x10;
const ENCRYPTED_PAYLOAD_LEN: usize = 256;

/// Root property holding the file version
pub const VERSION_PROPERTY: &str = "rff_version";
/// Entry property holding the resource id
pub const ID_PROPERTY: &str = "rff_id";
/// Entry property set on entries whose payload is stored encrypted
pub const ENCRYPTED_PROPERTY: &str = "encrypted";
/// Entry property holding the record timestamp
pub const TIME_PROPERTY: &str = "time";

#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"RFF\x1a", little)]
pub struct RffHeader {
    pub version: u16,
    pub padding: u16,
    pub dir_offset: u32,
    pub count: u32,
    pub reserved: [u8; 16],
}

#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct RffRecord {
    pub cache: [u8; 16],
    pub offset: u32,
    pub size: u32,
    pub packed_size: u32,
    pub time: u32,
    pub flags: u8,
    pub ext: [u8; 3],
    pub name: [u8; 8],
    pub id: u32,
}

/// XOR `data` with the rolling key used by Blood, starting at `key`
pub fn crypt(data: &mut [u8], key: u32) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= (key.wrapping_add(i as u32) >> 1) as u8;
    }
}

/// Toggle the encryption of the leading bytes of a flagged payload
pub(crate) fn crypt_payload(data: &mut [u8]) {
    let len = data.len().min(ENCRYPTED_PAYLOAD_LEN);
    crypt(&mut data[..len], 0);
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Ok(header) = RffHeader::read(&mut Cursor::new(data)) else {
        return Confidence::None;
    };
    let versions = [0x0200, 0x0300, ENCRYPTED_DIR_VERSION];
    if versions.contains(&header.version)
        && in_bounds(data, header.dir_offset as u64, header.count as u64 * RECORD_SIZE)
    {
        Confidence::Certain
    } else {
        Confidence::Unlikely
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let header = RffHeader::read(&mut Cursor::new(source.slice(0, HEADER_SIZE)?))?;
    root.dir_entry().write().properties_mut().insert(
        VERSION_PROPERTY.to_owned(),
        Property::Int(header.version as i64),
    );

    let mut dir = source
        .slice(header.dir_offset as u64, header.count as u64 * RECORD_SIZE)?
        .to_vec();
    if header.version == ENCRYPTED_DIR_VERSION {
        crypt(&mut dir, header.dir_offset);
    }

    let mut dir = Cursor::new(dir);
    for _ in 0..header.count {
        let record = RffRecord::read(&mut dir)?;
        let name = {
            let stem = name_from_bytes(&record.name);
            let ext = name_from_bytes(&record.ext);
            if ext.is_empty() {
                stem
            } else {
                format!("{stem}.{ext}")
            }
        };
        source.check(record.offset as u64, record.size as u64)?;
        debug!(%name, flags = record.flags, size = record.size, "resource");

        let encrypted = record.flags & FLAG_ENCRYPTED != 0;
        let mut lazy = Lazy::raw(source, record.offset as u64, record.size as u64);
        if encrypted {
            lazy = lazy.with_encoding(Encoding::RffEncrypted);
        }

        let mut entry = Entry::from_source(name, lazy);
        let properties = entry.properties_mut();
        properties.insert(ID_PROPERTY.to_owned(), Property::Int(record.id as i64));
        properties.insert(TIME_PROPERTY.to_owned(), Property::Int(record.time as i64));
        if encrypted {
            properties.insert(ENCRYPTED_PROPERTY.to_owned(), Property::Bool(true));
        }
        root.add_entry(entry.into_ref(), None);
    }

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let start = out.stream_position()?;
    let version = root
        .dir_entry()
        .read()
        .property(VERSION_PROPERTY)
        .and_then(Property::as_int)
        .and_then(|v| u16::try_from(v).ok())
        .unwrap_or(ENCRYPTED_DIR_VERSION);

    let mut header = RffHeader {
        version,
        padding: 0,
        dir_offset: 0,
        count: offset32(root.entries().len() as u64)?,
        reserved: [0; 16],
    };
    header.write(out)?;

    let mut records = Vec::with_capacity(root.entries().len());
    for (index, entry) in root.entries().iter().enumerate() {
        let entry = entry.read();
        let int_property = |key: &str| {
            entry
                .property(key)
                .and_then(Property::as_int)
                .and_then(|v| u32::try_from(v).ok())
        };
        let encrypted = entry.property(ENCRYPTED_PROPERTY).and_then(Property::as_bool)
            == Some(true);

        let mut data = entry.payload()?;
        if encrypted {
            crypt_payload(data.to_mut());
        }

        let (stem, ext) = split_extension(entry.name());
        records.push(RffRecord {
            offset: offset32(out.stream_position()? - start)?,
            size: offset32(data.len() as u64)?,
            time: int_property(TIME_PROPERTY).unwrap_or_default(),
            flags: if encrypted { FLAG_ENCRYPTED } else { 0 },
            ext: name_to_bytes(ext.trim_start_matches('.'), false)?,
            name: name_to_bytes(stem, false)?,
            id: int_property(ID_PROPERTY).unwrap_or(index as u32),
            ..Default::default()
        });
        out.write_all(&data)?;
    }

    header.dir_offset = offset32(out.stream_position()? - start)?;
    let mut dir = Cursor::new(Vec::with_capacity(records.len() * RECORD_SIZE as usize));
    for record in &records {
        record.write(&mut dir)?;
    }
    let mut dir = dir.into_inner();
    if version == ENCRYPTED_DIR_VERSION {
        crypt(&mut dir, header.dir_offset);
    }
    out.write_all(&dir)?;

    let end = out.stream_position()?;
    out.seek(SeekFrom::Start(start))?;
    header.write(out)?;
    out.seek(SeekFrom::Start(end))?;

    Ok(())
}
