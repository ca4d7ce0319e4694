//! This library reads, edits and writes the resource archives used by classic games such as
//! *Doom*, *Quake*, *Duke Nukem 3D* and *Blood*.
//!
//! # Archive Model
//!
//! Every format is parsed into the same tree: an [`Archive`] owns a root [`dir::ArchiveDir`],
//! which holds an ordered list of entries and, for formats that store paths, nested
//! directories. Entries are named binary payloads shared as [`entry::EntryRef`] handles. Payloads
//! of opened archives stay in the source buffer until they are first read.
//!
//! Formats without directories ("flat" formats) keep every entry in the root. Any call that
//! targets a directory resolves to the root for them, and creating or removing a directory fails
//! with [`error::Error::UnsupportedOperation`].
//!
//! ## Supported Formats
//!
//! | Id      | Format                          | Magic            | Directories |
//! |---------|---------------------------------|------------------|-------------|
//! | `wad`   | Doom IWAD / PWAD                | `IWAD` / `PWAD`  | no          |
//! | `wadj`  | Jaguar Doom WAD (big-endian)    | `IWAD` / `PWAD`  | no          |
//! | `wad2`  | Quake WAD2 / Half-Life WAD3     | `WAD2` / `WAD3`  | no          |
//! | `grp`   | Build engine group file         | `KenSilverman`   | no          |
//! | `pak`   | Quake PACK                      | `PACK`           | paths       |
//! | `hog`   | Descent HOG                     | `DHF`            | no          |
//! | `gob`   | Dark Forces GOB                 | `GOB\n`          | no          |
//! | `lfd`   | LucasArts LFD                   | `RMAP` chunk     | no          |
//! | `rff`   | Blood RFF                       | `RFF\x1a`        | no          |
//! | `adat`  | Anachronox DAT                  | `ADAT`           | paths       |
//! | `res`   | Amulets & Armor RES             | `Res!`           | tables      |
//! | `tar`   | POSIX ustar                     | `ustar` at 257   | yes         |
//! | `zip`   | PKZip                           | `PK\x03\x04`     | yes         |
//! | `gzip`  | gzip stream (one entry)         | `1F 8B`          | no          |
//! | `bzip2` | bzip2 stream (one entry)        | `BZh`            | no          |
//! | `bsp`   | Quake / Half-Life BSP textures  | version 29 / 30  | no          |
//! | `dat`   | Shadowcaster DAT                | none             | no          |
//! | `wolf`  | Wolfenstein 3D VSWAP            | none             | no          |
//!
//! All multi-byte integers are little-endian, except in Jaguar WADs.
//!
//! ## Entry State
//!
//! Entries track whether they differ from what is on disk:
//!
//! - **New**: created since the archive was last saved
//! - **Unmodified**: matches the saved archive
//! - **Modified**: payload, name or properties changed since the last save
//!
//! Saving commits every entry back to unmodified, and [`entry::Entry::revert`] restores the saved
//! payload of a modified entry.
//!
//! ## Format Detection
//!
//! [`sniff::FormatRegistry`] ranks byte buffers against every archive format plus a few generic
//! entry types. The registry is process-wide state set up with [`sniff::init`]; without it the
//! builtin registry is used.
//!

pub mod archive;
pub mod compression;
pub mod dir;
pub mod entry;
pub mod error;
pub mod formats;
pub mod maps;
pub mod namespace;
pub mod search;
pub mod sniff;
pub mod source;

pub use archive::{Archive, ImportOptions};
pub use compression::CompressionMethod;
pub use dir::{ArchiveDir, DirId, MergePolicy};
pub use entry::{Entry, EntryId, EntryRef, EntryState, Property};
pub use formats::ArchiveFormat;
pub use maps::{MapDesc, MapFormat};
pub use search::SearchOptions;
pub use sniff::{Confidence, FormatRegistry};
