//! Shared backing buffer that lazily-loaded entries point into.

use std::{fmt, sync::Arc};

use derive_more::Deref;

use crate::error::{Error, Result};

/// The raw bytes an archive was opened from
///
/// Cloning is cheap; every entry read from the archive keeps a handle to the same buffer and
/// only copies its own range out when its payload is requested.
#[derive(Clone, Deref)]
#[deref(forward)]
pub struct Source(Arc<[u8]>);

impl Source {
    /// Wrap a buffer
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Source(data.into())
    }

    /// Borrow `length` bytes starting at `offset`
    pub fn slice(&self, offset: u64, length: u64) -> Result<&[u8]> {
        let available = self.0.len() as u64;
        let end = offset.checked_add(length).filter(|end| *end <= available);

        match end {
            Some(end) => Ok(&self.0[offset as usize..end as usize]),
            None => Err(Error::Truncated {
                offset,
                needed: length,
                available,
            }),
        }
    }

    /// Ensure `length` bytes starting at `offset` exist
    pub fn check(&self, offset: u64, length: u64) -> Result<()> {
        self.slice(offset, length).map(|_| ())
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Source({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Source {
    fn from(value: Vec<u8>) -> Self {
        Source::new(value)
    }
}

#[cfg(test)]
mod test {
    use super::Source;

    #[test]
    fn slice_in_bounds() {
        let source = Source::from(vec![1, 2, 3, 4]);
        assert_eq!(source.slice(1, 2).unwrap(), &[2, 3]);
        assert_eq!(source.slice(4, 0).unwrap(), &[] as &[u8]);
        assert_eq!(source.len(), 4);
    }

    #[test]
    fn slice_out_of_bounds() {
        let source = Source::from(vec![1, 2, 3, 4]);
        assert!(source.slice(3, 2).is_err());
        assert!(source.slice(u64::MAX, 2).is_err());
    }
}
