//! Archive entries (lumps) and their payload handling.

use std::{
    borrow::Cow,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use derive_more::Display;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::{
    compression::{decompress, decompress_prefix, CompressionMethod, CRC32},
    dir::DirId,
    error::{malformed, unsupported, Result},
    formats::rff,
    sniff::FormatRegistry,
    source::Source,
};

/// A shared handle to an entry
///
/// The same entry may be held by an archive tree, a clipboard and an undo snapshot at once; it
/// is released when the last holder drops it.
pub type EntryRef = Arc<RwLock<Entry>>;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an entry, stable across moves, renames and snapshots
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("entry#{_0}")]
pub struct EntryId(u64);

impl EntryId {
    fn next() -> Self {
        EntryId(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Modification state of an entry relative to the last open or save
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntryState {
    /// Created since the archive was last saved
    #[default]
    New,
    /// Identical to what was read or last saved
    Unmodified,
    /// Changed since it was read or last saved
    Modified,
}

/// A format-specific value attached to an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Integer value
    Int(i64),
    /// Flag value
    Bool(bool),
    /// Text value
    Text(String),
}

impl Property {
    /// The value as an integer, if it is one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Property::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a flag, if it is one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Property::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as text, if it is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Property::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Property {
    fn from(value: i64) -> Self {
        Property::Int(value)
    }
}

impl From<u32> for Property {
    fn from(value: u32) -> Self {
        Property::Int(value as i64)
    }
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Property::Bool(value)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Property::Text(value.to_owned())
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Property::Text(value)
    }
}

/// How the bytes behind a lazy payload are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    Raw,
    Compressed {
        method: CompressionMethod,
        size: u64,
    },
    RffEncrypted,
    Unsupported(u16),
}

/// A payload that has not been read out of its source yet
#[derive(Debug, Clone)]
pub(crate) struct Lazy {
    pub source: Source,
    pub offset: u64,
    pub length: u64,
    pub encoding: Encoding,
    /// CRC-32 of the decoded payload, verified on load
    pub checksum: Option<u32>,
}

impl Lazy {
    pub fn raw(source: &Source, offset: u64, length: u64) -> Self {
        Lazy {
            source: source.clone(),
            offset,
            length,
            encoding: Encoding::Raw,
            checksum: None,
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_checksum(mut self, checksum: u32) -> Self {
        self.checksum = Some(checksum);
        self
    }

    fn load(&self) -> Result<Cow<'_, [u8]>> {
        let data = self.decode()?;
        if let Some(expected) = self.checksum {
            let actual = CRC32.checksum(&data);
            if actual != expected {
                return Err(malformed(format!(
                    "payload checksum {actual:08x} does not match the stored {expected:08x}"
                )));
            }
        }
        Ok(data)
    }

    /// The start of the payload, decoding no more than `limit` bytes of compressed data
    fn load_prefix(&self, limit: u64) -> Result<Cow<'_, [u8]>> {
        match self.encoding {
            Encoding::Compressed { method, .. } => {
                let stored = self.source.slice(self.offset, self.length)?;
                Ok(Cow::Owned(decompress_prefix(stored, method, limit)?))
            }
            _ => self.decode(),
        }
    }

    fn decode(&self) -> Result<Cow<'_, [u8]>> {
        let stored = self.source.slice(self.offset, self.length)?;
        match self.encoding {
            Encoding::Raw => Ok(Cow::Borrowed(stored)),
            Encoding::Compressed { method, size } => {
                Ok(Cow::Owned(decompress(stored, method, Some(size))?))
            }
            Encoding::RffEncrypted => {
                let mut data = stored.to_vec();
                rff::crypt_payload(&mut data);
                Ok(Cow::Owned(data))
            }
            Encoding::Unsupported(method) => Err(unsupported(format!(
                "payload uses unsupported compression method {method}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum EntryData {
    Loaded(Arc<[u8]>),
    Lazy(Lazy),
}

impl EntryData {
    fn empty() -> Self {
        EntryData::Loaded(Arc::from(Vec::new()))
    }
}

/// A named binary payload inside an archive
///
/// Entries read from an archive stay backed by the archive's [`Source`] until their data is
/// requested through [`Entry::data`], which loads, decodes and caches it.
pub struct Entry {
    id: EntryId,
    name: String,
    kind: String,
    state: EntryState,
    data: EntryData,
    backing: Option<EntryData>,
    size: u64,
    parent: Option<DirId>,
    properties: IndexMap<String, Property>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("size", &self.size)
            .field("loaded", &self.is_loaded())
            .field("parent", &self.parent)
            .finish()
    }
}

impl Entry {
    /// Type id given to entries that have not been classified
    pub const UNKNOWN_KIND: &'static str = "unknown";

    /// Decoded bytes of a compressed payload that type detection looks at
    pub const SNIFF_PREFIX: u64 = 64 * 1024;

    /// Create a new, empty entry
    pub fn new(name: impl Into<String>) -> Self {
        Entry {
            id: EntryId::next(),
            name: name.into(),
            kind: Self::UNKNOWN_KIND.to_owned(),
            state: EntryState::New,
            data: EntryData::empty(),
            backing: None,
            size: 0,
            parent: None,
            properties: IndexMap::new(),
        }
    }

    /// Create a new entry holding `data`
    pub fn with_data(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        Entry {
            size: data.len() as u64,
            data: EntryData::Loaded(data),
            ..Entry::new(name)
        }
    }

    pub(crate) fn from_source(name: impl Into<String>, lazy: Lazy) -> Self {
        let size = match lazy.encoding {
            Encoding::Compressed { size, .. } => size,
            _ => lazy.length,
        };
        let data = EntryData::Lazy(lazy);
        Entry {
            size,
            state: EntryState::Unmodified,
            backing: Some(data.clone()),
            data,
            ..Entry::new(name)
        }
    }

    pub(crate) fn loaded(name: impl Into<String>, data: Vec<u8>) -> Self {
        let mut entry = Entry::with_data(name, data);
        entry.state = EntryState::Unmodified;
        entry.backing = Some(entry.data.clone());
        entry
    }

    /// Back the entry with `lazy` as if it had been read that way, keeping its state
    pub(crate) fn attach(&mut self, lazy: Lazy) {
        self.size = lazy.length;
        let data = EntryData::Lazy(lazy);
        self.backing = Some(data.clone());
        self.data = data;
    }

    pub(crate) fn dir_entry(name: impl Into<String>) -> Self {
        let mut entry = Entry::new(name);
        entry.kind = "folder".to_owned();
        entry.state = EntryState::Unmodified;
        entry
    }

    /// Wrap the entry in a shared handle
    pub fn into_ref(self) -> EntryRef {
        Arc::new(RwLock::new(self))
    }

    /// Identity of the entry
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Name of the entry, including any extension
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the entry in upper case
    pub fn upper_name(&self) -> String {
        self.name.to_ascii_uppercase()
    }

    /// Name of the entry without its extension
    pub fn name_no_ext(&self) -> &str {
        split_extension(&self.name).0
    }

    /// Extension of the entry name without the dot, if any
    pub fn extension(&self) -> Option<&str> {
        let (_, ext) = split_extension(&self.name);
        ext.strip_prefix('.')
    }

    /// Type id assigned by the format registry
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Override the type id
    pub fn set_kind(&mut self, kind: impl Into<String>) {
        self.kind = kind.into();
    }

    /// Current modification state
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Size of the payload in bytes once loaded and decoded
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Directory currently holding this entry
    pub fn parent_dir(&self) -> Option<DirId> {
        self.parent
    }

    /// Whether the payload has been read out of its source
    pub fn is_loaded(&self) -> bool {
        matches!(self.data, EntryData::Loaded(_))
    }

    /// Format-specific properties
    pub fn properties(&self) -> &IndexMap<String, Property> {
        &self.properties
    }

    /// A single format-specific property
    pub fn property(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }

    /// Set a format-specific property, marking the entry modified
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Property>) {
        self.properties.insert(key.into(), value.into());
        self.mark_modified();
    }

    /// Remove a format-specific property, marking the entry modified if it existed
    pub fn remove_property(&mut self, key: &str) -> Option<Property> {
        let removed = self.properties.shift_remove(key);
        if removed.is_some() {
            self.mark_modified();
        }
        removed
    }

    pub(crate) fn properties_mut(&mut self) -> &mut IndexMap<String, Property> {
        &mut self.properties
    }

    /// Get the payload, loading and caching it on first access
    ///
    /// A failed load leaves the entry backed by its source, so the call can be retried.
    pub fn data(&mut self) -> Result<Arc<[u8]>> {
        let loaded: Arc<[u8]> = match &self.data {
            EntryData::Loaded(data) => return Ok(data.clone()),
            EntryData::Lazy(lazy) => Arc::from(lazy.load()?.as_ref()),
        };
        self.data = EntryData::Loaded(loaded.clone());
        Ok(loaded)
    }

    /// Inspect the payload without caching it
    pub fn peek<T>(&self, f: impl FnOnce(&[u8]) -> T) -> Result<T> {
        Ok(f(&self.payload()?))
    }

    /// The decoded payload, borrowed when already loaded
    pub(crate) fn payload(&self) -> Result<Cow<'_, [u8]>> {
        match &self.data {
            EntryData::Loaded(data) => Ok(Cow::Borrowed(data)),
            EntryData::Lazy(lazy) => lazy.load(),
        }
    }

    /// Replace the payload, marking the entry modified
    pub fn set_data(&mut self, data: impl Into<Arc<[u8]>>) {
        let data = data.into();
        self.size = data.len() as u64;
        self.data = EntryData::Loaded(data);
        self.mark_modified();
    }

    /// The payload as far as type detection needs it
    ///
    /// Stored payloads are seen whole; compressed ones are only decoded up to
    /// [`Entry::SNIFF_PREFIX`] bytes and not cached.
    fn sniff_payload(&self) -> Result<Cow<'_, [u8]>> {
        match &self.data {
            EntryData::Loaded(data) => Ok(Cow::Borrowed(data)),
            EntryData::Lazy(lazy) => lazy.load_prefix(Self::SNIFF_PREFIX),
        }
    }

    /// Classify the payload against `registry` and store the resulting type id
    pub fn detect_kind(&mut self, registry: &FormatRegistry) -> Result<&str> {
        let kind = registry
            .classify(&self.sniff_payload()?)
            .map(|(id, _)| id.to_owned());
        self.kind = kind.unwrap_or_else(|| Self::UNKNOWN_KIND.to_owned());
        Ok(&self.kind)
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name != self.name {
            self.name = name;
            self.mark_modified();
        }
    }

    pub(crate) fn set_parent(&mut self, parent: Option<DirId>) {
        self.parent = parent;
    }

    /// Restore the payload last read from or saved to disk
    ///
    /// Entries created since the last save have nothing to revert to and are left untouched.
    pub fn revert(&mut self) -> bool {
        if self.state != EntryState::Modified {
            return false;
        }
        let Some(backing) = self.backing.clone() else {
            return false;
        };

        self.size = match &backing {
            EntryData::Loaded(data) => data.len() as u64,
            EntryData::Lazy(lazy) => match lazy.encoding {
                Encoding::Compressed { size, .. } => size,
                _ => lazy.length,
            },
        };
        self.data = backing;
        self.state = EntryState::Unmodified;
        true
    }

    /// Record the current payload as the saved state
    pub(crate) fn commit(&mut self) {
        self.backing = Some(self.data.clone());
        self.state = EntryState::Unmodified;
    }

    /// Copy the entry under a new identity, detached from any directory
    pub fn duplicate(&self) -> Entry {
        Entry {
            id: EntryId::next(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            state: EntryState::New,
            data: self.data.clone(),
            backing: None,
            size: self.size,
            parent: None,
            properties: self.properties.clone(),
        }
    }

    /// Copy the entry keeping its identity, state and parent
    pub(crate) fn snapshot(&self) -> Entry {
        Entry {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind.clone(),
            state: self.state,
            data: self.data.clone(),
            backing: self.backing.clone(),
            size: self.size,
            parent: self.parent,
            properties: self.properties.clone(),
        }
    }

    fn mark_modified(&mut self) {
        if self.state == EntryState::Unmodified {
            self.state = EntryState::Modified;
        }
    }
}

/// Split `name` into stem and extension (the extension keeps its leading dot)
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(index) => name.split_at(index),
    }
}
