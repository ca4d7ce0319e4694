//! Single gzip streams
//!
//! A gzip file wraps one deflate stream. The optional header file name becomes the entry name;
//! without one the entry is named after the archive file minus its `.gz` extension.

use std::io::{Read, Seek, Write};

use flate2::{read::GzDecoder, Compression, GzBuilder};
use tracing::{debug, instrument};

use crate::{
    dir::ArchiveDir,
    entry::{Entry, Property},
    error::{malformed, unsupported, Result},
    sniff::Confidence,
    source::Source,
};

/// Entry property holding the modification time recorded in the gzip header
pub const MTIME_PROPERTY: &str = "mtime";

const DEFAULT_NAME: &str = "data";

pub fn sniff(data: &[u8]) -> Confidence {
    match data {
        [0x1F, 0x8B, 0x08, ..] => Confidence::Certain,
        [0x1F, 0x8B, ..] => Confidence::Unlikely,
        _ => Confidence::None,
    }
}

/// Name for a stream without a stored one, derived from the archive's own file name
pub(crate) fn hinted_name(hint: Option<&str>, extensions: &[&str]) -> String {
    let Some(hint) = hint.filter(|hint| !hint.is_empty()) else {
        return DEFAULT_NAME.to_owned();
    };
    let lower = hint.to_ascii_lowercase();
    for ext in extensions {
        if let Some(stem_len) = lower.strip_suffix(ext).map(str::len) {
            if stem_len > 0 && lower.as_bytes()[stem_len - 1] == b'.' {
                return hint[..stem_len - 1].to_owned();
            }
        }
    }
    hint.to_owned()
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir, name_hint: Option<&str>) -> Result<()> {
    if sniff(source) != Confidence::Certain {
        return Err(malformed("not a gzip stream"));
    }

    let mut decoder = GzDecoder::new(&source[..]);
    let mut data = Vec::new();
    decoder.read_to_end(&mut data)?;

    let header = decoder
        .header()
        .ok_or_else(|| malformed("incomplete gzip header"))?;
    let name = header
        .filename()
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| hinted_name(name_hint, &["gz"]));
    let mtime = header.mtime();
    debug!(%name, size = data.len(), mtime, "stream");

    let mut entry = Entry::loaded(name, data);
    if mtime != 0 {
        entry
            .properties_mut()
            .insert(MTIME_PROPERTY.to_owned(), Property::Int(mtime as i64));
    }
    root.add_entry(entry.into_ref(), None);

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let [entry] = root.entries() else {
        return Err(unsupported(format!(
            "a gzip file holds exactly one entry, not {}",
            root.entries().len()
        )));
    };

    let entry = entry.read();
    let data = entry.payload()?;
    let mtime = entry
        .property(MTIME_PROPERTY)
        .and_then(Property::as_int)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or_default();

    let mut encoder = GzBuilder::new()
        .filename(entry.name().as_bytes())
        .mtime(mtime)
        .write(out, Compression::best());
    encoder.write_all(&data)?;
    encoder.finish()?;

    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::{Cursor, Write};

    use flate2::{write::GzEncoder, Compression};
    use pretty_assertions::assert_eq;

    use super::{hinted_name, read, sniff, write, MTIME_PROPERTY};
    use crate::{
        dir::ArchiveDir,
        entry::{Entry, Property},
        error::Result,
        sniff::Confidence,
        source::Source,
    };

    #[test]
    fn names_from_hint() {
        assert_eq!(hinted_name(Some("doom2.wad.gz"), &["gz"]), "doom2.wad");
        assert_eq!(hinted_name(Some("DOOM2.WAD.GZ"), &["gz"]), "DOOM2.WAD");
        assert_eq!(hinted_name(Some("gz"), &["gz"]), "gz");
        assert_eq!(hinted_name(Some("notes"), &["gz"]), "notes");
        assert_eq!(hinted_name(None, &["gz"]), "data");
    }

    #[test]
    fn stored_name_and_mtime() -> Result<()> {
        let mut root = ArchiveDir::root(true);
        let mut entry = Entry::with_data("doom2.wad", b"PWAD".repeat(64));
        entry.set_property(MTIME_PROPERTY, 1_000_000i64);
        root.add_entry(entry.into_ref(), None);

        let mut out = Cursor::new(Vec::new());
        write(&root, &mut out)?;
        let bytes = out.into_inner();
        assert_eq!(sniff(&bytes), Confidence::Certain);

        let mut again = ArchiveDir::root(true);
        read(&Source::from(bytes), &mut again, Some("ignored.gz"))?;
        let mut entry = again.entries()[0].write();
        assert_eq!(entry.name(), "doom2.wad");
        assert_eq!(entry.property(MTIME_PROPERTY), Some(&Property::Int(1_000_000)));
        assert_eq!(&*entry.data()?, b"PWAD".repeat(64).as_slice());

        Ok(())
    }

    #[test]
    fn anonymous_stream_uses_hint() -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(b"hello")?;
        let bytes = encoder.finish()?;

        let mut root = ArchiveDir::root(true);
        read(&Source::from(bytes), &mut root, Some("greeting.txt.gz"))?;
        assert_eq!(root.entries()[0].read().name(), "greeting.txt");
        assert_eq!(root.entries()[0].read().size(), 5);

        Ok(())
    }

    #[test]
    fn only_one_entry() {
        let mut root = ArchiveDir::root(true);
        root.add_entry(Entry::with_data("a", vec![1]).into_ref(), None);
        root.add_entry(Entry::with_data("b", vec![2]).into_ref(), None);
        assert!(write(&root, &mut Cursor::new(Vec::new())).is_err());
    }
}
