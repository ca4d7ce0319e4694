use std::path::PathBuf;

use clap::{Args, ValueEnum};
use miette::{Context, Result};
use tracing::{info, warn};
use wadkit_archive::{Archive, ArchiveFormat, MergePolicy};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Conflicts {
    /// Keep both entries, renaming the later one
    #[default]
    Rename,
    /// Keep the later entry
    Replace,
    /// Keep the earlier entry
    Skip,
}

impl From<Conflicts> for MergePolicy {
    fn from(conflicts: Conflicts) -> Self {
        match conflicts {
            Conflicts::Rename => MergePolicy::KeepBoth,
            Conflicts::Replace => MergePolicy::Overwrite,
            Conflicts::Skip => MergePolicy::Skip,
        }
    }
}

#[derive(Args)]
pub struct ConvertArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// A target archive
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Parse the input as this format instead of detecting it
    #[arg(long)]
    from: Option<ArchiveFormat>,

    /// Format of the target, guessed from its extension when omitted
    #[arg(long)]
    to: Option<ArchiveFormat>,

    /// What to do when two entries end up with the same name
    #[arg(long, value_enum, default_value_t)]
    conflicts: Conflicts,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ConvertArgs {
    pub fn handle(&self) -> Result<()> {
        let format = super::output_format(&self.output, self.to)?;
        super::check_target(&self.output, self.overwrite)?;

        let source = super::open(&self.input, self.from)?;
        if source.format().supports_dirs() && !format.supports_dirs() {
            warn!(from = %source.format(), to = %format, "directories will be flattened");
        }

        info!("converting {} to {format}", self.input.display());
        let mut target = Archive::new(format);
        let added = target
            .paste(source.root(), None, None, self.conflicts.into())
            .context(format!("copying entries into a {format} archive"))?;
        info!(entries = added.len(), "copied entries");

        target
            .save_as(&self.output)
            .context(format!("writing {}", self.output.display()))?;
        Ok(())
    }
}
