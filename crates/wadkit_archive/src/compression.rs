//! Payload compression and decompression handling.

use std::io::{self, Read, Write};

use bzip2::{read::BzDecoder, write::BzEncoder};
use flate2::{
    read::{DeflateDecoder, ZlibDecoder},
    write::{DeflateEncoder, ZlibEncoder},
    Compression,
};
use tracing::instrument;

use crate::error::{malformed, Result};

/// Identifies the storage format used to compress an entry payload
///
/// Flat formats mostly store payloads as they are; `adat` wraps each entry in zlib and
/// `zip` picks per entry between storing, deflate and bzip2.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Stores the data as it is
    #[default]
    None,

    /// Compress the data using Zlib (deflate with a zlib header and adler32 trailer)
    Zlib,

    /// Compress the data using raw deflate
    Deflate,

    /// Compress the data using bzip2
    Bzip2,
}

impl CompressionMethod {
    /// Map a zip `compression method` field onto a supported method
    pub fn from_zip_method(method: u16) -> Option<Self> {
        match method {
            0 => Some(CompressionMethod::None),
            8 => Some(CompressionMethod::Deflate),
            12 => Some(CompressionMethod::Bzip2),
            _ => None,
        }
    }

    /// The zip `compression method` field for this method, if zip can express it
    pub fn zip_method(self) -> Option<u16> {
        match self {
            CompressionMethod::None => Some(0),
            CompressionMethod::Deflate => Some(8),
            CompressionMethod::Bzip2 => Some(12),
            CompressionMethod::Zlib => None,
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CompressionMethod::None => "none",
            CompressionMethod::Zlib => "zlib",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Bzip2 => "bzip2",
        })
    }
}

pub(crate) enum BlockReader<'a> {
    Raw(&'a [u8]),
    Zlib(Box<ZlibDecoder<&'a [u8]>>),
    Deflate(Box<DeflateDecoder<&'a [u8]>>),
    Bzip2(Box<BzDecoder<&'a [u8]>>),
}

impl<'a> BlockReader<'a> {
    #[tracing::instrument(skip(data), fields(size = data.len()))]
    pub fn new(data: &'a [u8], compression: CompressionMethod) -> Self {
        match compression {
            CompressionMethod::None => BlockReader::Raw(data),
            CompressionMethod::Zlib => BlockReader::Zlib(Box::new(ZlibDecoder::new(data))),
            CompressionMethod::Deflate => {
                BlockReader::Deflate(Box::new(DeflateDecoder::new(data)))
            }
            CompressionMethod::Bzip2 => BlockReader::Bzip2(Box::new(BzDecoder::new(data))),
        }
    }
}

impl Read for BlockReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlockReader::Raw(r) => r.read(buf),
            BlockReader::Zlib(r) => r.read(buf),
            BlockReader::Deflate(r) => r.read(buf),
            BlockReader::Bzip2(r) => r.read(buf),
        }
    }

    #[instrument(skip_all, err)]
    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        match self {
            BlockReader::Raw(r) => r.read_to_end(buf),
            BlockReader::Zlib(r) => r.read_to_end(buf),
            BlockReader::Deflate(r) => r.read_to_end(buf),
            BlockReader::Bzip2(r) => r.read_to_end(buf),
        }
    }
}

pub(crate) enum BlockWriter<W: Write> {
    Raw(W, usize),
    Zlib(Box<ZlibEncoder<W>>),
    Deflate(Box<DeflateEncoder<W>>),
    Bzip2(Box<BzEncoder<W>>),
}

impl<W: Write> BlockWriter<W> {
    #[tracing::instrument(skip(writer))]
    pub fn new(writer: W, compression: CompressionMethod) -> Self {
        match compression {
            CompressionMethod::None => BlockWriter::Raw(writer, 0),
            CompressionMethod::Zlib => BlockWriter::Zlib(Box::new(ZlibEncoder::new(
                writer,
                Compression::default(),
            ))),
            CompressionMethod::Deflate => BlockWriter::Deflate(Box::new(DeflateEncoder::new(
                writer,
                Compression::default(),
            ))),
            CompressionMethod::Bzip2 => BlockWriter::Bzip2(Box::new(BzEncoder::new(
                writer,
                bzip2::Compression::best(),
            ))),
        }
    }

    #[instrument(skip(self), err)]
    pub fn finalize(self) -> io::Result<W> {
        match self {
            BlockWriter::Raw(w, _) => Ok(w),
            BlockWriter::Zlib(w) => w.finish(),
            BlockWriter::Deflate(w) => w.finish(),
            BlockWriter::Bzip2(w) => w.finish(),
        }
    }

    pub fn total_in(&self) -> u64 {
        match self {
            BlockWriter::Raw(_, c) => *c as u64,
            BlockWriter::Zlib(w) => w.total_in(),
            BlockWriter::Deflate(w) => w.total_in(),
            BlockWriter::Bzip2(w) => w.total_in(),
        }
    }
}

impl<W: Write> Write for BlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BlockWriter::Raw(w, c) => {
                let written = w.write(buf)?;
                *c += written;
                Ok(written)
            }
            BlockWriter::Zlib(w) => w.write(buf),
            BlockWriter::Deflate(w) => w.write(buf),
            BlockWriter::Bzip2(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BlockWriter::Raw(w, _) => w.flush(),
            BlockWriter::Zlib(w) => w.flush(),
            BlockWriter::Deflate(w) => w.flush(),
            BlockWriter::Bzip2(w) => w.flush(),
        }
    }
}

/// Upper bound on the buffer reserved up front from a declared size
const MAX_PREALLOC: u64 = 64 << 20;

/// CRC-32 as used by zip and gzip
pub(crate) const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Decompress a whole payload, checking the result against the expected size when known
///
/// With a known size decoding stops one byte past it, so an oversized stream is never
/// expanded in full.
pub fn decompress(data: &[u8], method: CompressionMethod, expected: Option<u64>) -> Result<Vec<u8>> {
    let reserve = expected.unwrap_or(data.len() as u64).min(MAX_PREALLOC);
    let mut out = Vec::with_capacity(reserve as usize);
    let mut reader = BlockReader::new(data, method);

    let Some(expected) = expected else {
        reader.read_to_end(&mut out)?;
        return Ok(out);
    };

    reader.take(expected.saturating_add(1)).read_to_end(&mut out)?;
    if out.len() as u64 != expected {
        return Err(malformed(format!(
            "{method} payload does not expand to the expected {expected} bytes"
        )));
    }
    Ok(out)
}

/// Decompress at most `limit` bytes from the start of a payload
pub fn decompress_prefix(data: &[u8], method: CompressionMethod, limit: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(limit.min(MAX_PREALLOC) as usize);
    BlockReader::new(data, method)
        .take(limit)
        .read_to_end(&mut out)?;
    Ok(out)
}

/// Compress a whole payload
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    let mut writer = BlockWriter::new(Vec::with_capacity(data.len() / 2), method);
    writer.write_all(data)?;
    debug_assert_eq!(writer.total_in(), data.len() as u64);
    Ok(writer.finalize()?)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{compress, decompress, decompress_prefix, CompressionMethod, CRC32};
    use crate::error::Result;

    const HELLO: [u8; 11] = [
        0x48, 0x65, 0x6C, 0x6C, 0x6F, 0x20, 0x57, 0x6F, 0x72, 0x6C, 0x64,
    ];

    #[test]
    fn read_zlib_block() -> Result<()> {
        #[rustfmt::skip]
        let input = [
            0x78, 0x9C,
            0xF3, 0x48, 0xCD, 0xC9, 0xC9, 0x57, 0x08, 0xCF, 0x2F, 0xCA, 0x49, 0x01, 0x00, 0x18,
            0x0B, 0x04, 0x1D,
        ];

        assert_eq!(decompress(&input, CompressionMethod::Zlib, Some(11))?, HELLO);

        Ok(())
    }

    #[test]
    fn write_zlib_block() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            0x78, 0x9C,
            0xF3, 0x48, 0xCD, 0xC9, 0xC9, 0x57, 0x08, 0xCF, 0x2F, 0xCA, 0x49, 0x01, 0x00, 0x18,
            0x0B, 0x04, 0x1D,
        ];

        assert_eq!(compress(&HELLO, CompressionMethod::Zlib)?, expected);

        Ok(())
    }

    #[test]
    fn stored_block_is_untouched() -> Result<()> {
        assert_eq!(compress(&HELLO, CompressionMethod::None)?, HELLO);
        assert_eq!(decompress(&HELLO, CompressionMethod::None, None)?, HELLO);

        Ok(())
    }

    #[test]
    fn size_mismatch_is_malformed() {
        let packed = compress(&HELLO, CompressionMethod::Deflate).unwrap();
        assert!(decompress(&packed, CompressionMethod::Deflate, Some(12)).is_err());
    }

    #[test]
    fn oversized_stream_stops_at_declared_size() -> Result<()> {
        let data = vec![7u8; 1 << 20];
        let packed = compress(&data, CompressionMethod::Deflate)?;
        assert!(decompress(&packed, CompressionMethod::Deflate, Some(10)).is_err());
        assert_eq!(decompress(&packed, CompressionMethod::Deflate, None)?.len(), 1 << 20);

        Ok(())
    }

    #[test]
    fn prefix_only() -> Result<()> {
        let data = HELLO.repeat(1000);
        let packed = compress(&data, CompressionMethod::Zlib)?;
        assert_eq!(decompress_prefix(&packed, CompressionMethod::Zlib, 5)?, b"Hello");
        assert_eq!(decompress_prefix(&HELLO, CompressionMethod::None, 64)?, HELLO);
        assert!(decompress_prefix(&[0xFF; 16], CompressionMethod::Zlib, 64).is_err());

        Ok(())
    }

    #[test]
    fn crc_check_value() {
        assert_eq!(CRC32.checksum(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn bzip2_block() -> Result<()> {
        let data = HELLO.repeat(64);
        let packed = compress(&data, CompressionMethod::Bzip2)?;
        assert_eq!(&packed[0..3], b"BZh");
        assert_eq!(decompress(&packed, CompressionMethod::Bzip2, Some(data.len() as u64))?, data);

        Ok(())
    }

    #[test]
    fn zip_method_codes() {
        assert_eq!(CompressionMethod::from_zip_method(8), Some(CompressionMethod::Deflate));
        assert_eq!(CompressionMethod::from_zip_method(14), None);
        assert_eq!(CompressionMethod::Zlib.zip_method(), None);
    }
}
