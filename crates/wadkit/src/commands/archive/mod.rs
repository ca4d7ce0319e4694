use std::path::Path;

use miette::{miette, Context, IntoDiagnostic, Result};
use wadkit_archive::{Archive, ArchiveFormat};

pub mod build;
pub mod convert;
pub mod extract;
pub mod list;
pub mod maps;
pub mod sniff;

#[derive(clap::Subcommand)]
pub enum ArchiveCommands {
    /// List the entries of an archive
    List(list::ListArgs),
    /// Extract an archive into a directory
    Extract(extract::ExtractArgs),
    /// Build an archive from a directory
    Build(build::BuildArgs),
    /// Rewrite an archive in another format
    Convert(convert::ConvertArgs),
    /// List the maps in an archive
    Maps(maps::MapsArgs),
    /// Report what the format registry thinks of some files
    Sniff(sniff::SniffArgs),
}

impl ArchiveCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            ArchiveCommands::List(list) => list.handle(),
            ArchiveCommands::Extract(extract) => extract.handle(),
            ArchiveCommands::Build(build) => build.handle(),
            ArchiveCommands::Convert(convert) => convert.handle(),
            ArchiveCommands::Maps(maps) => maps.handle(),
            ArchiveCommands::Sniff(sniff) => sniff.handle(),
        }
    }
}

/// Open `path`, forcing `format` when given
pub(crate) fn open(path: &Path, format: Option<ArchiveFormat>) -> Result<Archive> {
    let archive = match format {
        Some(format) => {
            let mut archive = Archive::new(format);
            archive.open_file(path).map(|_| archive)
        }
        None => Archive::from_file(path),
    };
    archive.context(format!("opening {}", path.display()))
}

/// The format to write `path` in: `explicit` if given, otherwise guessed from the extension
pub(crate) fn output_format(path: &Path, explicit: Option<ArchiveFormat>) -> Result<ArchiveFormat> {
    if let Some(format) = explicit {
        return Ok(format);
    }

    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| miette!("{} has no extension, pass --format", path.display()))?;
    wadkit_archive::sniff::global()
        .descriptor_for_extension(ext)
        .and_then(|descriptor| ArchiveFormat::from_id(&descriptor.id))
        .ok_or_else(|| miette!("no archive format uses .{ext}, pass --format"))
}

/// Refuse to replace an existing file unless asked to
pub(crate) fn check_target(path: &Path, overwrite: bool) -> Result<()> {
    let exists = path
        .try_exists()
        .into_diagnostic()
        .context(format!("checking {}", path.display()))?;
    if exists && !overwrite {
        return Err(miette!(
            help = "pass --overwrite to replace it",
            "{} already exists",
            path.display()
        ));
    }
    Ok(())
}
