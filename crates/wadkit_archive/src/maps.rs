//! Map lump group detection
//!
//! In flat archives a map is a header lump (`MAP01`, `E1M1`, ...) followed by a fixed set of data
//! lumps. Binary maps are recognized by their lump names, text maps by a `TEXTMAP` lump directly
//! after the header and an `ENDMAP` lump closing the run. Directory-based archives keep every map
//! as a complete WAD file under `maps/`.

use derive_more::Display;
use tracing::{debug, warn};

use crate::{
    dir::ArchiveDir,
    entry::EntryRef,
    error::Result,
    formats::{wad, ArchiveFormat},
    sniff::Confidence,
    source::Source,
};

/// Lumps every binary map carries
const REQUIRED_LUMPS: [&str; 5] = ["THINGS", "LINEDEFS", "SIDEDEFS", "VERTEXES", "SECTORS"];

/// Lumps a binary map may carry besides the required ones
const OPTIONAL_LUMPS: [&str; 12] = [
    "SEGS", "SSECTORS", "NODES", "REJECT", "BLOCKMAP", "BEHAVIOR", "SCRIPTS", "LEAFS", "LIGHTS",
    "MACROS", "ZNODES", "GL_PVS",
];

/// Lumps known to appear between `TEXTMAP` and `ENDMAP`
const TEXT_MAP_LUMPS: [&str; 6] = ["ZNODES", "REJECT", "BLOCKMAP", "BEHAVIOR", "DIALOGUE", "SCRIPTS"];

/// The flavour of a detected map
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapFormat {
    /// Binary Doom format
    Doom,
    /// Binary Hexen format, with a `BEHAVIOR` lump
    Hexen,
    /// Binary Doom 64 format, with `LEAFS`, `LIGHTS` or `MACROS` lumps
    Doom64,
    /// Text based universal map format
    Udmf,
    /// Could not be determined
    Unknown,
}

/// A run of entries making up one level
#[derive(Debug, Clone)]
pub struct MapDesc {
    /// Name of the map, taken from the header entry
    pub name: String,
    /// The header entry (or the embedded WAD holding the map)
    pub head: EntryRef,
    /// The last entry of the run
    pub end: EntryRef,
    pub format: MapFormat,
    /// Whether `head` is an embedded WAD rather than a header lump
    pub archive: bool,
    /// Whether the map carries ZDoom extended nodes
    pub extended_nodes: bool,
    /// Lumps inside the run with names the detector does not know
    pub unknown: Vec<EntryRef>,
}

fn is_map_lump(name: &str) -> bool {
    REQUIRED_LUMPS.contains(&name) || OPTIONAL_LUMPS.contains(&name) || name.starts_with("GL_")
}

/// Namespace markers and the text map terminator, which never belong to a binary map
fn is_marker(name: &str) -> bool {
    name == "ENDMAP" || name.ends_with("_START") || name.ends_with("_END")
}

/// Whether the lump at `index` is the header of a following map
fn starts_map(names: &[String], index: usize) -> bool {
    !is_map_lump(&names[index])
        && names
            .get(index + 1)
            .is_some_and(|next| next == "THINGS" || next == "TEXTMAP")
}

/// Detect every map in a flat list of entries
///
/// A binary map runs from its header up to the next map header or marker, or up to a map lump
/// name that repeats. Its last known map lump closes it; unknown lumps before that are kept in
/// [`MapDesc::unknown`].
pub fn detect_flat(entries: &[EntryRef]) -> Vec<MapDesc> {
    let names: Vec<String> = entries
        .iter()
        .map(|entry| entry.read().upper_name())
        .collect();
    let mut maps = Vec::new();
    let mut index = 0;

    while index + 1 < names.len() {
        let head = index;

        if names[head + 1] == "TEXTMAP" {
            let Some(end) = names[head + 2..]
                .iter()
                .position(|name| name == "ENDMAP")
                .map(|offset| head + 2 + offset)
            else {
                warn!(map = %names[head], "TEXTMAP without ENDMAP");
                index += 1;
                continue;
            };

            let inner = head + 2..end;
            let unknown = inner
                .clone()
                .filter(|i| !TEXT_MAP_LUMPS.contains(&names[*i].as_str()))
                .map(|i| entries[i].clone())
                .collect();
            let extended_nodes = names[inner].iter().any(|name| name == "ZNODES");
            debug!(map = %names[head], end, "text map");

            maps.push(MapDesc {
                name: entries[head].read().name().to_owned(),
                head: entries[head].clone(),
                end: entries[end].clone(),
                format: MapFormat::Udmf,
                archive: false,
                extended_nodes,
                unknown,
            });
            index = end + 1;
            continue;
        }

        if is_map_lump(&names[head]) || is_marker(&names[head]) || !is_map_lump(&names[head + 1]) {
            index += 1;
            continue;
        }

        let mut run: Vec<&str> = Vec::new();
        let mut end = head;
        for next in head + 1..names.len() {
            let name = names[next].as_str();
            if is_marker(name) || starts_map(&names, next) {
                break;
            }
            if is_map_lump(name) {
                if run.contains(&name) {
                    break;
                }
                run.push(name);
                end = next;
            }
        }
        let complete = REQUIRED_LUMPS
            .iter()
            .all(|required| run.contains(required));

        if !complete {
            index += 1;
            continue;
        }

        let has = |lump: &str| run.contains(&lump);
        let format = if has("BEHAVIOR") {
            MapFormat::Hexen
        } else if has("LEAFS") || has("LIGHTS") || has("MACROS") {
            MapFormat::Doom64
        } else {
            MapFormat::Doom
        };
        let unknown: Vec<EntryRef> = (head + 1..end)
            .filter(|i| !is_map_lump(&names[*i]))
            .map(|i| entries[i].clone())
            .collect();
        debug!(map = %names[head], %format, lumps = run.len(), unknown = unknown.len(), "binary map");

        maps.push(MapDesc {
            name: entries[head].read().name().to_owned(),
            head: entries[head].clone(),
            end: entries[end].clone(),
            format,
            archive: false,
            extended_nodes: has("ZNODES"),
            unknown,
        });
        index = end + 1;
    }

    maps
}

/// Detect the maps stored as WAD files in the `maps` directory of a directory-based archive
pub fn detect_hierarchical(root: &ArchiveDir) -> Vec<MapDesc> {
    let Some(dir) = root.subdir("maps") else {
        return Vec::new();
    };

    let mut maps = Vec::new();
    for entry in dir.entries() {
        let (name, is_wad_name) = {
            let entry = entry.read();
            let is_wad_name = entry
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wad"));
            (entry.name_no_ext().to_owned(), is_wad_name)
        };

        let (format, extended_nodes) = match embedded_map(entry) {
            Ok(Some(inner)) => (inner.format, inner.extended_nodes),
            Ok(None) if is_wad_name => (MapFormat::Unknown, false),
            Ok(None) => continue,
            Err(error) => {
                warn!(%name, %error, "could not read embedded map");
                if !is_wad_name {
                    continue;
                }
                (MapFormat::Unknown, false)
            }
        };

        maps.push(MapDesc {
            name,
            head: entry.clone(),
            end: entry.clone(),
            format,
            archive: true,
            extended_nodes,
            unknown: Vec::new(),
        });
    }

    maps
}

/// The first map inside an entry holding a WAD file
fn embedded_map(entry: &EntryRef) -> Result<Option<MapDesc>> {
    let data = entry.read().payload()?.into_owned();
    if ArchiveFormat::Wad.sniff(&data) < Confidence::Probably {
        return Ok(None);
    }

    let mut inner = ArchiveDir::root(true);
    wad::read(&Source::from(data), &mut inner)?;
    Ok(detect_flat(inner.entries()).into_iter().next())
}
