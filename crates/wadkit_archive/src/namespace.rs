//! Namespaces of flat archives
//!
//! Flat formats group related lumps between paired marker lumps such as `S_START` and `S_END`.
//! [`scan`] turns a lump name sequence into namespace spans:
//!
//! - markers are matched by their normalized prefix (`SS_START` and `S_START` both open the
//!   sprite namespace, `P1_START` opens patches)
//! - a start marker without a matching end extends to the end of the archive
//! - an end marker without a matching start is ignored
//! - the marker lumps themselves are outside the namespace they delimit
//!
//! When spans nest or overlap, the entry belongs to the innermost one, i.e. the span whose
//! start marker is closest before it.

use tracing::debug;

use crate::{
    dir::ArchiveDir,
    entry::{EntryId, EntryRef},
};

/// Namespace of entries outside every marker pair
pub const GLOBAL: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Start,
    End,
}

fn parse_marker(name: &str) -> Option<(String, Marker)> {
    let upper = name.to_ascii_uppercase();
    let (prefix, marker) = if let Some(prefix) = upper.strip_suffix("_START") {
        (prefix, Marker::Start)
    } else if let Some(prefix) = upper.strip_suffix("_END") {
        (prefix, Marker::End)
    } else {
        return None;
    };
    if prefix.is_empty() {
        return None;
    }
    Some((normalize_prefix(prefix).to_owned(), marker))
}

/// Collapse the doubled and numbered marker variants onto their base prefix
fn normalize_prefix(prefix: &str) -> &str {
    match prefix {
        "SS" => "S",
        "PP" | "P1" | "P2" | "P3" => "P",
        "FF" | "F1" | "F2" | "F3" => "F",
        other => other,
    }
}

/// Display name of a marker prefix
pub fn namespace_name(prefix: &str) -> String {
    match normalize_prefix(&prefix.to_ascii_uppercase()) {
        "S" => "sprites".to_owned(),
        "P" => "patches".to_owned(),
        "F" => "flats".to_owned(),
        "TX" => "textures".to_owned(),
        "C" => "colormaps".to_owned(),
        "V" => "voices".to_owned(),
        "HI" => "hires".to_owned(),
        "A" => "acs".to_owned(),
        "VX" => "voxels".to_owned(),
        other => other.to_ascii_lowercase(),
    }
}

/// A marker-delimited run of entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSpan {
    /// Display name of the namespace
    pub name: String,
    /// Index of the start marker
    pub start: usize,
    /// Index of the end marker, or the entry count for an unterminated namespace
    pub end: usize,
}

impl NamespaceSpan {
    /// Whether the entry at `index` is inside the span, markers excluded
    pub fn contains(&self, index: usize) -> bool {
        self.start < index && index < self.end
    }
}

/// Find every namespace span in a lump name sequence, ordered by start marker
pub fn scan<S: AsRef<str>>(names: &[S]) -> Vec<NamespaceSpan> {
    let mut open: Vec<(String, usize)> = Vec::new();
    let mut spans = Vec::new();

    for (index, name) in names.iter().enumerate() {
        match parse_marker(name.as_ref()) {
            Some((prefix, Marker::Start)) => open.push((prefix, index)),
            Some((prefix, Marker::End)) => {
                match open.iter().rposition(|(open_prefix, _)| *open_prefix == prefix) {
                    Some(position) => {
                        let (prefix, start) = open.remove(position);
                        spans.push(NamespaceSpan {
                            name: namespace_name(&prefix),
                            start,
                            end: index,
                        });
                    }
                    None => debug!(name = name.as_ref(), index, "end marker without a start"),
                }
            }
            None => {}
        }
    }

    for (prefix, start) in open {
        debug!(%prefix, start, "unterminated namespace");
        spans.push(NamespaceSpan {
            name: namespace_name(&prefix),
            start,
            end: names.len(),
        });
    }

    spans.sort_by_key(|span| span.start);
    spans
}

/// Namespace of the entry at `index`, given the spans from [`scan`]
pub fn namespace_at(spans: &[NamespaceSpan], index: usize) -> &str {
    spans
        .iter()
        .filter(|span| span.contains(index))
        .max_by_key(|span| span.start)
        .map_or(GLOBAL, |span| span.name.as_str())
}

/// Namespace of an entry in a directory-based archive: its top level directory
pub fn namespace_of_path(path: &str) -> String {
    match path.trim_start_matches('/').split_once('/') {
        Some((top, _)) if !top.is_empty() => top.to_ascii_lowercase(),
        _ => GLOBAL.to_owned(),
    }
}

/// Upper case names of the entries of `dir`, for scanning
pub(crate) fn entry_names(dir: &ArchiveDir) -> Vec<String> {
    dir.entries()
        .iter()
        .map(|entry| entry.read().upper_name())
        .collect()
}

/// The semantic groups Jaguar Doom tracks through namespace pointers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Patches,
    Sprites,
    Flats,
    Textures,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Patches,
        Category::Sprites,
        Category::Flats,
        Category::Textures,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Patches => "patches",
            Category::Sprites => "sprites",
            Category::Flats => "flats",
            Category::Textures => "textures",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match normalize_prefix(prefix) {
            "P" => Some(Category::Patches),
            "S" => Some(Category::Sprites),
            "F" => Some(Category::Flats),
            "T" | "TX" => Some(Category::Textures),
            _ => None,
        }
    }
}

/// First and last entry of each category, by entry id
///
/// The Jaguar dialect uses looser marker names than PC Doom, so the archive records where each
/// category begins and ends when it is opened and classifies entries against those bounds before
/// falling back to a marker scan. Pointers are ids, so they survive entries moving around.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespacePointers {
    bounds: [Option<(EntryId, EntryId)>; 4],
}

impl NamespacePointers {
    /// Record the bounds of every non-empty category among the entries of `dir`
    pub fn scan(dir: &ArchiveDir) -> Self {
        let entries = dir.entries();
        let mut pointers = NamespacePointers::default();
        let mut open: [Option<usize>; 4] = [None; 4];

        for (index, entry) in entries.iter().enumerate() {
            let name = entry.read().upper_name();
            let Some((prefix, marker)) = parse_marker(&name) else {
                continue;
            };
            let Some(category) = Category::from_prefix(&prefix) else {
                continue;
            };
            let slot = category as usize;
            match marker {
                Marker::Start => open[slot] = Some(index),
                Marker::End => {
                    if let Some(start) = open[slot].take() {
                        pointers.bounds[slot] = bounds(entries, start + 1, index);
                    }
                }
            }
        }

        for (slot, start) in open.iter().enumerate() {
            if let Some(start) = start {
                pointers.bounds[slot] = bounds(entries, start + 1, entries.len());
            }
        }

        pointers
    }

    /// First and last entry of `category`
    pub fn get(&self, category: Category) -> Option<(EntryId, EntryId)> {
        self.bounds[category as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.iter().all(Option::is_none)
    }

    /// Category of the entry at `index` in `dir`, if a pointer pair brackets it
    pub fn category_at(&self, dir: &ArchiveDir, index: usize) -> Option<Category> {
        Category::ALL.into_iter().find(|category| {
            self.get(*category)
                .and_then(|(first, last)| Some((dir.entry_index(first)?, dir.entry_index(last)?)))
                .is_some_and(|(first, last)| first <= index && index <= last)
        })
    }
}

fn bounds(entries: &[EntryRef], first: usize, end: usize) -> Option<(EntryId, EntryId)> {
    if first >= end {
        return None;
    }
    Some((entries[first].read().id(), entries[end - 1].read().id()))
}
