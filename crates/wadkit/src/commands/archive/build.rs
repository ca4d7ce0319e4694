use std::path::PathBuf;

use clap::Args;
use miette::{miette, Context, Result};
use tracing::info;
use walkdir::WalkDir;
use wadkit_archive::{Archive, ArchiveFormat, ImportOptions};

#[derive(Args)]
pub struct BuildArgs {
    /// An input directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Format of the target, guessed from its extension when omitted
    #[arg(long)]
    format: Option<ArchiveFormat>,

    /// Keep file extensions in entry names (WAD formats drop them by default)
    #[arg(long)]
    keep_extensions: bool,

    /// Only import the top level of the directory
    #[arg(long, default_value_t = false)]
    flat: bool,

    /// Follow symbolic links while walking the directory
    #[arg(long, default_value_t = false)]
    follow_links: bool,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl BuildArgs {
    pub fn handle(&self) -> Result<()> {
        let format = super::output_format(&self.file, self.format)?;
        super::check_target(&self.file, self.overwrite)?;

        let has_files = WalkDir::new(&self.directory)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| e.file_type().is_file());
        if !has_files {
            return Err(miette!("directory is empty"));
        }

        info!("creating {} as {format}", self.file.display());
        let mut archive = Archive::new(format);
        let options = ImportOptions::builder()
            .recursive(!self.flat)
            .follow_links(self.follow_links)
            .maybe_strip_extensions(self.keep_extensions.then_some(false))
            .build();
        let added = archive
            .import_dir(&self.directory, None, &options)
            .context(format!("importing {}", self.directory.display()))?;
        info!(entries = added.len(), "imported files");

        archive
            .save_as(&self.file)
            .context(format!("writing {}", self.file.display()))?;
        Ok(())
    }
}
