//! Single bzip2 streams
//!
//! bzip2 stores no file name, so the entry is named after the archive file minus its `.bz2`
//! extension.

use std::io::{Read, Seek, Write};

use ::bzip2::{read::MultiBzDecoder, write::BzEncoder, Compression};
use tracing::{debug, instrument};

use super::gzip::hinted_name;
use crate::{
    dir::ArchiveDir,
    entry::Entry,
    error::{malformed, unsupported, Result},
    sniff::Confidence,
    source::Source,
};

const BLOCK_MAGIC: [u8; 6] = [0x31, 0x41, 0x59, 0x26, 0x53, 0x59];

pub fn sniff(data: &[u8]) -> Confidence {
    match data {
        [b'B', b'Z', b'h', b'1'..=b'9', block @ ..] if block.starts_with(&BLOCK_MAGIC) => {
            Confidence::Certain
        }
        [b'B', b'Z', b'h', b'1'..=b'9', ..] => Confidence::Probably,
        _ => Confidence::None,
    }
}

#[instrument(skip_all, err)]
pub(crate) fn read(source: &Source, root: &mut ArchiveDir, name_hint: Option<&str>) -> Result<()> {
    if sniff(source) < Confidence::Probably {
        return Err(malformed("not a bzip2 stream"));
    }

    let mut data = Vec::new();
    MultiBzDecoder::new(&source[..]).read_to_end(&mut data)?;

    let name = hinted_name(name_hint, &["bz2"]);
    debug!(%name, size = data.len(), "stream");
    root.add_entry(Entry::loaded(name, data).into_ref(), None);

    Ok(())
}

#[instrument(skip_all, err)]
pub(crate) fn write<W: Write + Seek>(root: &ArchiveDir, out: &mut W) -> Result<()> {
    let [entry] = root.entries() else {
        return Err(unsupported(format!(
            "a bzip2 file holds exactly one entry, not {}",
            root.entries().len()
        )));
    };

    let data = entry.read().payload()?.into_owned();
    let mut encoder = BzEncoder::new(out, Compression::best());
    encoder.write_all(&data)?;
    encoder.finish()?;

    Ok(())
}
