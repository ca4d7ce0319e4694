use std::{
    collections::HashSet,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use tracing::{info, warn};
use wadkit_archive::{Archive, ArchiveFormat};

#[derive(Args)]
pub struct ExtractArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Parse the input as this format instead of detecting it
    #[arg(long)]
    format: Option<ArchiveFormat>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

/// Give repeated paths (lump names repeat in WADs) a numbered suffix
fn unique_path(path: String, seen: &mut HashSet<String>) -> String {
    if seen.insert(path.to_ascii_lowercase()) {
        return path;
    }
    let candidate = (1..)
        .map(|n| format!("{path}.{n}"))
        .find(|candidate| !seen.contains(&candidate.to_ascii_lowercase()))
        .unwrap_or_else(|| path.clone());
    seen.insert(candidate.to_ascii_lowercase());
    candidate
}

fn create(path: &Path, overwrite: bool) -> Result<File> {
    let file = if overwrite {
        File::create(path)
    } else {
        File::create_new(path)
    };
    file.into_diagnostic()
        .context(format!("creating {}", path.display()))
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let archive = super::open(&self.file, self.format)?;
        let mut seen = HashSet::new();

        for entry in archive.root().all_entries() {
            let Some(path) = archive.entry_path(&entry) else {
                continue;
            };
            if path.split('/').any(|part| part == "..") {
                warn!(%path, "skipping entry that escapes the target directory");
                continue;
            }

            let target = self.directory.join(unique_path(path, &mut seen));
            info!("writing {}", target.display());
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .into_diagnostic()
                    .context(format!("creating {}", parent.display()))?;
            }

            let context = format!("reading {}", target.display());
            let data = entry.write().data().context(context)?;
            create(&target, self.overwrite)?
                .write_all(&data)
                .into_diagnostic()
                .context(format!("writing {}", target.display()))?;
        }

        Ok(())
    }
}
