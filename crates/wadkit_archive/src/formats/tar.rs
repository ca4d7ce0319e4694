//! POSIX ustar archives
//!
//! Files are stored as 512 byte header blocks followed by their data padded to a whole block.
//! Numeric header fields are NUL terminated octal strings (GNU base-256 sizes are accepted on
//! read) and the checksum is the byte sum of the header with the checksum field read as
//! spaces. Paths longer than the 100 byte name field are split across the prefix field when
//! possible and otherwise written as a GNU `L` long name record. The archive ends with two
//! zero blocks.

use std::io::{Cursor, Seek, Write};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument};

use super::{dir_paths, entry_paths, insert_at_path, name_from_bytes, name_to_bytes};
use crate::{
    dir::ArchiveDir,
    entry::{Entry, Lazy, Property},
    error::{malformed, unsupported, Error, Result},
    sniff::Confidence,
    source::Source,
};

const BLOCK: u64 = 512;
const NAME_LEN: usize = 100;
const PREFIX_LEN: usize = 155;

/// Entry property holding the modification time
pub const MTIME_PROPERTY: &str = "mtime";

/// Entry property holding the permission bits
pub const MODE_PROPERTY: &str = "mode";

#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
pub struct TarHeader {
    pub name: [u8; 100],
    pub mode: [u8; 8],
    pub uid: [u8; 8],
    pub gid: [u8; 8],
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub checksum: [u8; 8],
    pub typeflag: u8,
    pub linkname: [u8; 100],
    pub magic: [u8; 6],
    pub version: [u8; 2],
    pub uname: [u8; 32],
    pub gname: [u8; 32],
    pub devmajor: [u8; 8],
    pub devminor: [u8; 8],
    pub prefix: [u8; 155],
    pub padding: [u8; 12],
}

impl Default for TarHeader {
    fn default() -> Self {
        TarHeader {
            name: [0; 100],
            mode: [0; 8],
            uid: [0; 8],
            gid: [0; 8],
            size: [0; 12],
            mtime: [0; 12],
            checksum: [0; 8],
            typeflag: b'0',
            linkname: [0; 100],
            magic: *b"ustar\0",
            version: *b"00",
            uname: [0; 32],
            gname: [0; 32],
            devmajor: [0; 8],
            devminor: [0; 8],
            prefix: [0; 155],
            padding: [0; 12],
        }
    }
}

impl TarHeader {
    fn parse(block: &[u8]) -> Result<Self> {
        Ok(TarHeader::read_le(&mut Cursor::new(block))?)
    }

    fn to_block(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(BLOCK as usize));
        self.write_le(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Build a header for a file or directory, splitting long paths over the prefix field
    fn new(path: &str, typeflag: u8, size: u64, mtime: u64, mode: u64) -> Result<Self> {
        let mut header = TarHeader {
            typeflag,
            ..Default::default()
        };
        match split_ustar_path(path) {
            Some((prefix, name)) => {
                header.name = name_to_bytes(name, false)?;
                header.prefix = name_to_bytes(prefix, false)?;
            }
            // the full path goes into a preceding long name record
            None => {
                let len = path.len().min(NAME_LEN);
                header.name[..len].copy_from_slice(&path.as_bytes()[..len]);
            }
        }
        header.mode = octal_field(mode)?;
        header.uid = octal_field(0)?;
        header.gid = octal_field(0)?;
        header.size = octal_field(size)?;
        header.mtime = octal_field(mtime)?;
        header.seal()?;
        Ok(header)
    }

    fn seal(&mut self) -> Result<()> {
        self.checksum = [b' '; 8];
        let sum = checksum(&self.to_block()?);
        let mut field = [0u8; 8];
        let digits = format!("{sum:06o}");
        field[..6].copy_from_slice(digits.as_bytes());
        field[6] = 0;
        field[7] = b' ';
        self.checksum = field;
        Ok(())
    }

    fn is_ustar(&self) -> bool {
        &self.magic[..5] == b"ustar"
    }

    fn path(&self) -> String {
        let name = name_from_bytes(&self.name);
        let prefix = name_from_bytes(&self.prefix);
        if self.is_ustar() && !prefix.is_empty() {
            format!("{prefix}/{name}")
        } else {
            name
        }
    }
}

/// Sum of the header bytes with the checksum field counted as spaces
fn checksum(block: &[u8]) -> u64 {
    block
        .iter()
        .enumerate()
        .map(|(i, b)| if (148..156).contains(&i) { b' ' as u64 } else { *b as u64 })
        .sum()
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(field).ok()?;
    let text = text.trim_matches(|c: char| c == '\0' || c == ' ');
    if text.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(text, 8).ok()
}

/// Parse a numeric field, accepting the GNU base-256 form
fn parse_numeric(field: &[u8]) -> Option<u64> {
    match field.first() {
        Some(first) if first & 0x80 != 0 => field[1..].iter().try_fold(
            (*first & 0x7F) as u64,
            |acc, b| acc.checked_mul(256).map(|acc| acc | *b as u64),
        ),
        _ => parse_octal(field),
    }
}

fn octal_field<const N: usize>(value: u64) -> Result<[u8; N]> {
    let digits = format!("{value:0width$o}", width = N - 1);
    if digits.len() > N - 1 {
        return Err(unsupported(format!("{value} does not fit a {N} byte tar field")));
    }
    let mut field = [0u8; N];
    field[..N - 1].copy_from_slice(digits.as_bytes());
    Ok(field)
}

/// Split a path into ustar prefix and name, if it can be stored that way
fn split_ustar_path(path: &str) -> Option<(&str, &str)> {
    if path.len() <= NAME_LEN {
        return Some(("", path));
    }
    path.char_indices()
        .filter(|(_, c)| *c == '/')
        .map(|(i, _)| (&path[..i], &path[i + 1..]))
        .find(|(prefix, name)| prefix.len() <= PREFIX_LEN && name.len() <= NAME_LEN && !name.is_empty())
}

fn padded(size: u64) -> u64 {
    size.div_ceil(BLOCK) * BLOCK
}

/// Parse `path=` out of a pax extended header body
fn pax_path(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    text.lines().find_map(|line| {
        let (_, record) = line.split_once(' ')?;
        record.strip_prefix("path=").map(str::to_owned)
    })
}

pub fn sniff(data: &[u8]) -> Confidence {
    let Some(block) = data.get(..BLOCK as usize) else {
        return Confidence::None;
    };
    let Ok(header) = TarHeader::parse(block) else {
        return Confidence::None;
    };
    let stored = parse_octal(&header.checksum);
    let valid_sum = stored.is_some() && stored == Some(checksum(block)) && checksum(block) != 256;
    match (valid_sum, header.is_ustar()) {
        (true, true) => Confidence::Certain,
        (true, false) => Confidence::Probably,
        _ => Confidence::None,
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir) -> Result<()> {
    let len = source.len() as u64;
    let mut offset = 0;
    let mut long_name: Option<String> = None;

    while offset + BLOCK <= len {
        let block = source.slice(offset, BLOCK)?;
        if block.iter().all(|b| *b == 0) {
            break;
        }

        let header = TarHeader::parse(block)?;
        let stored = parse_octal(&header.checksum)
            .ok_or_else(|| malformed(format!("bad checksum field at {offset}")))?;
        if stored != checksum(block) {
            return Err(malformed(format!("checksum mismatch at {offset}")));
        }
        let size = parse_numeric(&header.size)
            .ok_or_else(|| malformed(format!("bad size field at {offset}")))?;
        let data_offset = offset + BLOCK;
        source.check(data_offset, size)?;
        offset = data_offset + padded(size);

        let path = long_name.take().unwrap_or_else(|| header.path());
        match header.typeflag {
            b'0' | b'\0' | b'7' => {
                debug!(%path, size, "file");
                let mtime = parse_numeric(&header.mtime).unwrap_or_default();
                let mode = parse_octal(&header.mode).unwrap_or(0o644);
                insert_at_path(root, &path, |name| {
                    let mut entry = Entry::from_source(name, Lazy::raw(source, data_offset, size));
                    let properties = entry.properties_mut();
                    properties.insert(MTIME_PROPERTY.to_owned(), Property::Int(mtime as i64));
                    properties.insert(MODE_PROPERTY.to_owned(), Property::Int(mode as i64));
                    entry
                });
            }
            b'5' => {
                debug!(%path, "directory");
                root.ensure_subdir_path(&path);
            }
            b'L' => {
                long_name = Some(name_from_bytes(source.slice(data_offset, size)?));
            }
            b'x' => {
                long_name = pax_path(source.slice(data_offset, size)?);
            }
            other => {
                debug!(%path, typeflag = other, "skipped unsupported tar record");
            }
        }
    }

    if offset < len && !source.slice(offset, len - offset)?.iter().all(|b| *b == 0) {
        return Err(malformed(format!("truncated record at {offset}")));
    }

    Ok(())
}

fn write_record<W: Write + Seek>(out: &mut W, header: &TarHeader, data: &[u8]) -> Result<()> {
    out.write_all(&header.to_block()?)?;
    out.write_all(data)?;
    let padding = padded(data.len() as u64) - data.len() as u64;
    out.write_all(&vec![0u8; padding as usize])?;
    Ok(())
}

fn write_path<W: Write + Seek>(out: &mut W, path: &str) -> Result<()> {
    if split_ustar_path(path).is_none() {
        let mut name = path.as_bytes().to_vec();
        name.push(0);
        let mut header = TarHeader::new("././@LongLink", b'L', name.len() as u64, 0, 0o644)?;
        header.magic = *b"ustar ";
        header.version = *b" \0";
        header.seal()?;
        write_record(out, &header, &name)?;
    }
    Ok(())
}

fn int_property(entry: &Entry, key: &str) -> Option<u64> {
    entry
        .property(key)
        .and_then(Property::as_int)
        .and_then(|v| u64::try_from(v).ok())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    for path in dir_paths(root) {
        write_path(out, &path)?;
        let header = TarHeader::new(&path, b'5', 0, 0, 0o755)?;
        write_record(out, &header, &[])?;
    }

    for (path, entry) in entry_paths(root) {
        let entry = entry.read();
        let data = entry.payload()?;
        write_path(out, &path)?;
        let header = TarHeader::new(
            &path,
            b'0',
            data.len() as u64,
            int_property(&entry, MTIME_PROPERTY).unwrap_or_default(),
            int_property(&entry, MODE_PROPERTY).unwrap_or(0o644),
        )
        .map_err(|err| match err {
            Error::UnsupportedOperation(_) => Error::UnsupportedOperation(format!(
                "{path} is too large for a tar archive"
            )),
            err => err,
        })?;
        write_record(out, &header, &data)?;
    }

    out.write_all(&[0u8; 2 * BLOCK as usize])?;
    Ok(())
}
