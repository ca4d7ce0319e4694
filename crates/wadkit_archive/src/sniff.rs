//! Format detection from raw bytes
//!
//! A [`FormatRegistry`] holds an ordered list of classifiers. Every classifier is a pure
//! function of the buffer returning a [`Confidence`]; the registry picks the highest one and
//! breaks ties by registration order, so specific formats are registered ahead of the generic
//! fallbacks.
//!
//! The process-wide registry is explicit state: call [`init`] at start-up (optionally with
//! descriptors loaded from a metadata table) and [`teardown`] to drop it. Until then
//! [`global`] hands out the builtin registry.

use std::{
    io::Read,
    sync::{Arc, OnceLock},
};

use derive_more::Display;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{error::Result, formats::ArchiveFormat};

/// How sure a classifier is that a buffer is in its format
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    None,
    Unlikely,
    Maybe,
    Probably,
    Certain,
}

/// A named classification function
#[derive(Debug, Clone)]
pub struct Classifier {
    /// Type id reported on a match
    pub id: String,
    /// Archive driver behind the id, if it is an archive format
    pub archive: Option<ArchiveFormat>,
    /// The classification function
    pub sniff: fn(&[u8]) -> Confidence,
}

/// Metadata describing a format, as found in the external format table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Identifier shared with the classifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Extensions without the dot
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Whether the format stores directories
    #[serde(default)]
    pub supports_dirs: bool,
    /// Longest name the format stores
    #[serde(default)]
    pub max_name_length: Option<usize>,
}

/// Ordered set of classifiers plus the format metadata table
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    classifiers: Vec<Classifier>,
    descriptors: Vec<FormatDescriptor>,
}

impl FormatRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every archive driver followed by the builtin entry types
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for format in ArchiveFormat::ALL {
            registry.register_archive(format);
        }
        registry.register("png", sniff_png);
        registry.register("marker", sniff_marker);
        registry.register("text", sniff_text);
        registry.register("binary", sniff_binary);
        registry
    }

    /// Append a classifier; earlier registrations win ties
    pub fn register(&mut self, id: impl Into<String>, sniff: fn(&[u8]) -> Confidence) {
        self.classifiers.push(Classifier {
            id: id.into(),
            archive: None,
            sniff,
        });
    }

    /// Append the classifier and descriptor of an archive driver
    pub fn register_archive(&mut self, format: ArchiveFormat) {
        self.classifiers.push(Classifier {
            id: format.id().to_owned(),
            archive: Some(format),
            sniff: format.sniffer(),
        });
        self.merge_descriptor(format.descriptor());
    }

    pub fn classifiers(&self) -> &[Classifier] {
        &self.classifiers
    }

    /// The best match for `data`, if any classifier is more than [`Confidence::None`] sure
    #[instrument(skip_all, fields(size = data.len()))]
    pub fn classify(&self, data: &[u8]) -> Option<(&str, Confidence)> {
        self.best(data, |_| true)
            .map(|(classifier, confidence)| (classifier.id.as_str(), confidence))
    }

    /// Every classifier that matched `data`, in registration order
    pub fn classify_all(&self, data: &[u8]) -> Vec<(&str, Confidence)> {
        self.classifiers
            .iter()
            .map(|classifier| (classifier.id.as_str(), (classifier.sniff)(data)))
            .filter(|(_, confidence)| *confidence > Confidence::None)
            .collect()
    }

    /// The archive driver that best matches `data`
    pub fn archive_format(&self, data: &[u8]) -> Option<ArchiveFormat> {
        self.best(data, |classifier| classifier.archive.is_some())
            .and_then(|(classifier, _)| classifier.archive)
    }

    fn best(
        &self,
        data: &[u8],
        filter: impl Fn(&Classifier) -> bool,
    ) -> Option<(&Classifier, Confidence)> {
        let mut best: Option<(&Classifier, Confidence)> = None;
        for classifier in self.classifiers.iter().filter(|c| filter(c)) {
            let confidence = (classifier.sniff)(data);
            if confidence == Confidence::Certain {
                return Some((classifier, confidence));
            }
            if confidence > best.map_or(Confidence::None, |(_, c)| c) {
                best = Some((classifier, confidence));
            }
        }
        best
    }

    pub fn descriptors(&self) -> &[FormatDescriptor] {
        &self.descriptors
    }

    /// Metadata for the format `id`
    pub fn descriptor(&self, id: &str) -> Option<&FormatDescriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.id.eq_ignore_ascii_case(id))
    }

    /// First format listing `ext` among its extensions
    pub fn descriptor_for_extension(&self, ext: &str) -> Option<&FormatDescriptor> {
        let ext = ext.trim_start_matches('.');
        self.descriptors.iter().find(|descriptor| {
            descriptor
                .extensions
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
    }

    /// Add or replace a metadata row, keyed by id
    pub fn merge_descriptor(&mut self, descriptor: FormatDescriptor) {
        match self
            .descriptors
            .iter_mut()
            .find(|known| known.id.eq_ignore_ascii_case(&descriptor.id))
        {
            Some(known) => *known = descriptor,
            None => self.descriptors.push(descriptor),
        }
    }

    /// Merge a JSON array of [`FormatDescriptor`] rows over the current table
    #[instrument(skip_all, err)]
    pub fn load_descriptors_json(&mut self, reader: impl Read) -> Result<usize> {
        let rows: Vec<FormatDescriptor> = serde_json::from_reader(reader)?;
        let count = rows.len();
        for row in rows {
            debug!(id = %row.id, "loaded format descriptor");
            self.merge_descriptor(row);
        }
        Ok(count)
    }
}

static GLOBAL: RwLock<Option<Arc<FormatRegistry>>> = RwLock::new(None);

/// Install `registry` as the process-wide registry
pub fn init(registry: FormatRegistry) -> Arc<FormatRegistry> {
    let registry = Arc::new(registry);
    *GLOBAL.write() = Some(registry.clone());
    registry
}

/// The process-wide registry, or the builtin one when [`init`] has not been called
pub fn global() -> Arc<FormatRegistry> {
    static BUILTIN: OnceLock<Arc<FormatRegistry>> = OnceLock::new();

    GLOBAL
        .read()
        .clone()
        .unwrap_or_else(|| BUILTIN.get_or_init(|| Arc::new(FormatRegistry::builtin())).clone())
}

/// Drop the process-wide registry, returning it
pub fn teardown() -> Option<Arc<FormatRegistry>> {
    GLOBAL.write().take()
}

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn sniff_png(data: &[u8]) -> Confidence {
    match data.get(..8) {
        Some(magic) if magic == PNG_MAGIC && data.len() >= 33 => Confidence::Certain,
        Some(magic) if magic == PNG_MAGIC => Confidence::Maybe,
        _ => Confidence::None,
    }
}

fn sniff_marker(data: &[u8]) -> Confidence {
    if data.is_empty() {
        Confidence::Probably
    } else {
        Confidence::None
    }
}

fn sniff_text(data: &[u8]) -> Confidence {
    let printable = |b: &u8| b.is_ascii_graphic() || b.is_ascii_whitespace() || *b >= 0x80;
    if !data.is_empty() && data.iter().take(4096).all(printable) {
        Confidence::Unlikely
    } else {
        Confidence::None
    }
}

fn sniff_binary(data: &[u8]) -> Confidence {
    if data.is_empty() {
        Confidence::None
    } else {
        Confidence::Unlikely
    }
}
