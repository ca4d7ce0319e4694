//! Binary layouts of the supported archive formats
//!
//! Each module parses one layout into an [`ArchiveDir`] tree and serializes a tree back. The
//! [`ArchiveFormat`] enum dispatches to them and carries the per-format capabilities the
//! archive consults (directory support, duplicate names, name length limits).

use std::{
    fmt,
    io::{Seek, Write},
    str::FromStr,
};

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    dir::ArchiveDir,
    entry::{Entry, EntryRef},
    error::{Error, Result},
    sniff::{Confidence, FormatDescriptor},
    source::Source,
};

pub mod adat;
pub mod bsp;
pub mod bzip2;
pub mod dat;
pub mod gob;
pub mod grp;
pub mod gzip;
pub mod hog;
pub mod lfd;
pub mod pak;
pub mod res;
pub mod rff;
pub mod tar;
pub mod wad;
pub mod wad2;
pub mod wadj;
pub mod wolf;
pub mod zip;

/// A supported archive layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// Doom IWAD/PWAD
    Wad,
    /// Quake WAD2 / Half-Life WAD3 texture wad
    Wad2,
    /// Jaguar Doom big-endian WAD
    WadJ,
    /// Build engine group file
    Grp,
    /// Quake PACK file
    Pak,
    /// Descent HOG file
    Hog,
    /// Dark Forces GOB file
    Gob,
    /// LucasArts LFD resource file
    Lfd,
    /// Blood RFF file
    Rff,
    /// Anachronox ADAT file
    Adat,
    /// Shadowcaster DAT file
    Dat,
    /// Amulets & Armor RES file
    Res,
    /// Quake / Half-Life BSP level (embedded textures)
    Bsp,
    /// Wolfenstein 3D VSWAP page file
    Wolf,
    /// POSIX ustar archive
    Tar,
    /// PKZip archive
    Zip,
    /// Single gzip stream
    Gzip,
    /// Single bzip2 stream
    Bzip2,
}

impl ArchiveFormat {
    /// Every format, in sniffing order
    pub const ALL: [ArchiveFormat; 18] = [
        ArchiveFormat::Wad,
        ArchiveFormat::WadJ,
        ArchiveFormat::Wad2,
        ArchiveFormat::Zip,
        ArchiveFormat::Pak,
        ArchiveFormat::Grp,
        ArchiveFormat::Rff,
        ArchiveFormat::Gob,
        ArchiveFormat::Adat,
        ArchiveFormat::Res,
        ArchiveFormat::Lfd,
        ArchiveFormat::Hog,
        ArchiveFormat::Gzip,
        ArchiveFormat::Bzip2,
        ArchiveFormat::Tar,
        ArchiveFormat::Bsp,
        ArchiveFormat::Dat,
        ArchiveFormat::Wolf,
    ];

    /// Short identifier used by the format registry and the command line
    pub fn id(self) -> &'static str {
        match self {
            ArchiveFormat::Wad => "wad",
            ArchiveFormat::Wad2 => "wad2",
            ArchiveFormat::WadJ => "wadj",
            ArchiveFormat::Grp => "grp",
            ArchiveFormat::Pak => "pak",
            ArchiveFormat::Hog => "hog",
            ArchiveFormat::Gob => "gob",
            ArchiveFormat::Lfd => "lfd",
            ArchiveFormat::Rff => "rff",
            ArchiveFormat::Adat => "adat",
            ArchiveFormat::Dat => "dat",
            ArchiveFormat::Res => "res",
            ArchiveFormat::Bsp => "bsp",
            ArchiveFormat::Wolf => "wolf",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Gzip => "gzip",
            ArchiveFormat::Bzip2 => "bzip2",
        }
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            ArchiveFormat::Wad => "Doom Wad Archive",
            ArchiveFormat::Wad2 => "Quake Wad2 Archive",
            ArchiveFormat::WadJ => "Jaguar Doom Wad Archive",
            ArchiveFormat::Grp => "Build Grp Archive",
            ArchiveFormat::Pak => "Quake Pak Archive",
            ArchiveFormat::Hog => "Descent Hog Archive",
            ArchiveFormat::Gob => "Dark Forces Gob Archive",
            ArchiveFormat::Lfd => "LucasArts Lfd Archive",
            ArchiveFormat::Rff => "Blood Rff Archive",
            ArchiveFormat::Adat => "Anachronox Dat Archive",
            ArchiveFormat::Dat => "Shadowcaster Dat Archive",
            ArchiveFormat::Res => "Amulets & Armor Res Archive",
            ArchiveFormat::Bsp => "Quake Bsp Level",
            ArchiveFormat::Wolf => "Wolfenstein 3D VSwap Archive",
            ArchiveFormat::Tar => "Tar Archive",
            ArchiveFormat::Zip => "Zip Archive",
            ArchiveFormat::Gzip => "Gzip File",
            ArchiveFormat::Bzip2 => "Bzip2 File",
        }
    }

    /// File extensions commonly used for the format, lower case and without the dot
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ArchiveFormat::Wad => &["wad", "iwad", "pwad"],
            ArchiveFormat::Wad2 => &["wad"],
            ArchiveFormat::WadJ => &["wad", "jag"],
            ArchiveFormat::Grp => &["grp"],
            ArchiveFormat::Pak => &["pak"],
            ArchiveFormat::Hog => &["hog"],
            ArchiveFormat::Gob => &["gob"],
            ArchiveFormat::Lfd => &["lfd"],
            ArchiveFormat::Rff => &["rff", "sfx"],
            ArchiveFormat::Adat => &["dat"],
            ArchiveFormat::Dat => &["dat"],
            ArchiveFormat::Res => &["res"],
            ArchiveFormat::Bsp => &["bsp"],
            ArchiveFormat::Wolf => &["wl6", "wl1", "sod", "sdm"],
            ArchiveFormat::Tar => &["tar"],
            ArchiveFormat::Zip => &["zip", "pk3", "pke", "pk7", "ipk3", "kzip"],
            ArchiveFormat::Gzip => &["gz", "tgz"],
            ArchiveFormat::Bzip2 => &["bz2", "tbz2"],
        }
    }

    /// Whether the layout stores real directories
    pub fn supports_dirs(self) -> bool {
        matches!(
            self,
            ArchiveFormat::Pak
                | ArchiveFormat::Adat
                | ArchiveFormat::Res
                | ArchiveFormat::Tar
                | ArchiveFormat::Zip
        )
    }

    /// Whether names are stored as whole paths, making the length limit apply to the path
    ///
    /// RES nests one table per directory, so its limit applies to each component.
    pub fn stores_paths(self) -> bool {
        self.supports_dirs() && self != ArchiveFormat::Res
    }

    /// Whether sibling entries may share a name (WAD lump names repeat per map)
    pub fn allows_duplicate_names(self) -> bool {
        !self.supports_dirs()
    }

    /// Longest name (or path, see [`ArchiveFormat::stores_paths`]) the layout can store
    pub fn max_name_length(self) -> Option<usize> {
        match self {
            ArchiveFormat::Wad | ArchiveFormat::WadJ => Some(8),
            ArchiveFormat::Wad2 => Some(15),
            ArchiveFormat::Grp => Some(12),
            ArchiveFormat::Pak => Some(55),
            ArchiveFormat::Hog | ArchiveFormat::Gob => Some(12),
            ArchiveFormat::Lfd => Some(13),
            ArchiveFormat::Rff => Some(12),
            ArchiveFormat::Adat => Some(127),
            ArchiveFormat::Dat => None,
            ArchiveFormat::Res => Some(14),
            ArchiveFormat::Bsp => Some(15),
            ArchiveFormat::Wolf => Some(8),
            ArchiveFormat::Tar => None,
            ArchiveFormat::Zip => Some(u16::MAX as usize),
            ArchiveFormat::Gzip | ArchiveFormat::Bzip2 => None,
        }
    }

    /// Whether the layout holds exactly one entry
    pub fn single_entry(self) -> bool {
        matches!(self, ArchiveFormat::Gzip | ArchiveFormat::Bzip2)
    }

    /// Look a format up by its [`ArchiveFormat::id`]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.id().eq_ignore_ascii_case(id))
    }

    /// The sniffing function for the format
    pub fn sniffer(self) -> fn(&[u8]) -> Confidence {
        match self {
            ArchiveFormat::Wad => wad::sniff,
            ArchiveFormat::Wad2 => wad2::sniff,
            ArchiveFormat::WadJ => wadj::sniff,
            ArchiveFormat::Grp => grp::sniff,
            ArchiveFormat::Pak => pak::sniff,
            ArchiveFormat::Hog => hog::sniff,
            ArchiveFormat::Gob => gob::sniff,
            ArchiveFormat::Lfd => lfd::sniff,
            ArchiveFormat::Rff => rff::sniff,
            ArchiveFormat::Adat => adat::sniff,
            ArchiveFormat::Dat => dat::sniff,
            ArchiveFormat::Res => res::sniff,
            ArchiveFormat::Bsp => bsp::sniff,
            ArchiveFormat::Wolf => wolf::sniff,
            ArchiveFormat::Tar => tar::sniff,
            ArchiveFormat::Zip => zip::sniff,
            ArchiveFormat::Gzip => gzip::sniff,
            ArchiveFormat::Bzip2 => bzip2::sniff,
        }
    }

    /// How confident the format is that `data` is one of its archives
    pub fn sniff(self, data: &[u8]) -> Confidence {
        (self.sniffer())(data)
    }

    /// Metadata row describing the format
    pub fn descriptor(self) -> FormatDescriptor {
        FormatDescriptor {
            id: self.id().to_owned(),
            name: self.name().to_owned(),
            extensions: self.extensions().iter().map(|ext| ext.to_string()).collect(),
            supports_dirs: self.supports_dirs(),
            max_name_length: self.max_name_length(),
        }
    }

    /// Parse `source` into `root`
    ///
    /// `name_hint` names the payload of single-stream formats that do not store one.
    pub(crate) fn read(
        self,
        source: &Source,
        root: &mut ArchiveDir,
        name_hint: Option<&str>,
    ) -> Result<()> {
        match self {
            ArchiveFormat::Wad => wad::read(source, root),
            ArchiveFormat::Wad2 => wad2::read(source, root),
            ArchiveFormat::WadJ => wadj::read(source, root),
            ArchiveFormat::Grp => grp::read(source, root),
            ArchiveFormat::Pak => pak::read(source, root),
            ArchiveFormat::Hog => hog::read(source, root),
            ArchiveFormat::Gob => gob::read(source, root),
            ArchiveFormat::Lfd => lfd::read(source, root),
            ArchiveFormat::Rff => rff::read(source, root),
            ArchiveFormat::Adat => adat::read(source, root),
            ArchiveFormat::Dat => dat::read(source, root),
            ArchiveFormat::Res => res::read(source, root),
            ArchiveFormat::Bsp => bsp::read(source, root),
            ArchiveFormat::Wolf => wolf::read(source, root),
            ArchiveFormat::Tar => tar::read(source, root),
            ArchiveFormat::Zip => zip::read(source, root),
            ArchiveFormat::Gzip => gzip::read(source, root, name_hint),
            ArchiveFormat::Bzip2 => bzip2::read(source, root, name_hint),
        }
    }

    /// Serialize `root` into `out`, starting at the current stream position
    pub(crate) fn write<W: Write + Seek>(self, root: &ArchiveDir, out: &mut W) -> Result<()> {
        match self {
            ArchiveFormat::Wad => wad::write(root, out),
            ArchiveFormat::Wad2 => wad2::write(root, out),
            ArchiveFormat::WadJ => wadj::write(root, out),
            ArchiveFormat::Grp => grp::write(root, out),
            ArchiveFormat::Pak => pak::write(root, out),
            ArchiveFormat::Hog => hog::write(root, out),
            ArchiveFormat::Gob => gob::write(root, out),
            ArchiveFormat::Lfd => lfd::write(root, out),
            ArchiveFormat::Rff => rff::write(root, out),
            ArchiveFormat::Adat => adat::write(root, out),
            ArchiveFormat::Dat => dat::write(root, out),
            ArchiveFormat::Res => res::write(root, out),
            ArchiveFormat::Bsp => bsp::write(root, out),
            ArchiveFormat::Wolf => wolf::write(root, out),
            ArchiveFormat::Tar => tar::write(root, out),
            ArchiveFormat::Zip => zip::write(root, out),
            ArchiveFormat::Gzip => gzip::write(root, out),
            ArchiveFormat::Bzip2 => bzip2::write(root, out),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ArchiveFormat::from_id(s).ok_or(Error::UnknownFormat)
    }
}

/// Decode a fixed-width, NUL padded name field
pub(crate) fn name_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Encode `name` into a fixed-width, NUL padded name field
///
/// `terminated` reserves the last byte for a NUL. Names that do not fit are an error.
pub(crate) fn name_to_bytes<const N: usize>(name: &str, terminated: bool) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    let limit = if terminated { N.saturating_sub(1) } else { N };
    let bytes = name.as_bytes();
    if bytes.len() > limit {
        return Err(Error::InvalidName(name.to_owned()));
    }
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Narrow an offset or size to the 32 bits the directory records hold
pub(crate) fn offset32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        Error::UnsupportedOperation(format!("{value} does not fit a 32 bit directory field"))
    })
}

/// Little-endian u32 at `offset`, if in bounds
pub(crate) fn peek_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(LittleEndian::read_u32(bytes))
}

/// Whether `start + len` lies inside `data`
pub(crate) fn in_bounds(data: &[u8], start: u64, len: u64) -> bool {
    start
        .checked_add(len)
        .is_some_and(|end| end <= data.len() as u64)
}

/// Every entry below `root` paired with its full path, own entries before subdirectories
pub(crate) fn entry_paths(root: &ArchiveDir) -> Vec<(String, EntryRef)> {
    fn walk(dir: &ArchiveDir, prefix: &str, out: &mut Vec<(String, EntryRef)>) {
        for entry in dir.entries() {
            out.push((format!("{prefix}{}", entry.read().name()), entry.clone()));
        }
        for sub in dir.subdirs() {
            walk(sub, &format!("{prefix}{}/", sub.name()), out);
        }
    }

    let mut out = Vec::with_capacity(root.num_entries(true));
    walk(root, "", &mut out);
    out
}

/// Every directory below `root` as a path with a trailing slash, parents first
pub(crate) fn dir_paths(root: &ArchiveDir) -> Vec<String> {
    fn walk(dir: &ArchiveDir, prefix: &str, out: &mut Vec<String>) {
        for sub in dir.subdirs() {
            let path = format!("{prefix}{}/", sub.name());
            out.push(path.clone());
            walk(sub, &path, out);
        }
    }

    let mut out = Vec::new();
    walk(root, "", &mut out);
    out
}

/// Split a stored path into its directory part and file name
pub(crate) fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(index) => (&path[..index], &path[index + 1..]),
        None => ("", path),
    }
}

/// Place an entry read from a stored path inside `root`, creating directories as needed
///
/// Paths ending in a slash only create the directory.
pub(crate) fn insert_at_path(root: &mut ArchiveDir, path: &str, make: impl FnOnce(&str) -> Entry) {
    let (dir, name) = split_path(path.trim_start_matches('/'));
    let dir = root.ensure_subdir_path(dir);
    if !name.is_empty() {
        dir.add_entry(make(name).into_ref(), None);
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{name_from_bytes, name_to_bytes, split_path, ArchiveFormat};
    use crate::error::{Error, Result};

    #[test]
    fn names() -> Result<()> {
        assert_eq!(name_from_bytes(b"THINGS\0\0"), "THINGS");
        assert_eq!(name_from_bytes(b"VERTEXES"), "VERTEXES");
        assert_eq!(&name_to_bytes::<8>("VERTEXES", false)?, b"VERTEXES");
        assert_eq!(&name_to_bytes::<6>("A", true)?, b"A\0\0\0\0\0");
        assert!(matches!(
            name_to_bytes::<4>("LONG", true),
            Err(Error::InvalidName(_))
        ));
        assert!(name_to_bytes::<8>("LONGNAME9", false).is_err());
        Ok(())
    }

    #[test]
    fn paths() {
        assert_eq!(split_path("maps/e1m1.bsp"), ("maps", "e1m1.bsp"));
        assert_eq!(split_path("readme.txt"), ("", "readme.txt"));
        assert_eq!(split_path("sounds/"), ("sounds", ""));
    }

    #[test]
    fn ids_round_trip() {
        for format in ArchiveFormat::ALL {
            assert_eq!(format.id().parse::<ArchiveFormat>().ok(), Some(format));
            assert_eq!(format.allows_duplicate_names(), !format.supports_dirs());
            assert!(!format.stores_paths() || format.supports_dirs());
        }
    }
}
