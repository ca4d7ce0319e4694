use std::path::PathBuf;

use clap::Args;
use itertools::Itertools;
use miette::{IntoDiagnostic, Result};
use owo_colors::{OwoColorize, Stream::Stdout};
use wadkit_archive::{Archive, ArchiveFormat};

#[derive(Args)]
pub struct ListArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Parse the input as this format instead of detecting it
    #[arg(long)]
    format: Option<ArchiveFormat>,

    /// Print one JSON object per entry
    #[arg(long, default_value_t = false)]
    json: bool,
}

struct Row {
    index: usize,
    path: String,
    size: u64,
    kind: String,
    namespace: String,
}

fn rows(archive: &Archive) -> Result<Vec<Row>> {
    archive
        .root()
        .all_entries()
        .iter()
        .enumerate()
        .map(|(index, entry)| -> Result<Row> {
            Ok(Row {
                index,
                path: archive.entry_path(entry).unwrap_or_default(),
                size: entry.read().size(),
                kind: entry.read().kind().to_owned(),
                namespace: archive.detect_namespace(entry)?,
            })
        })
        .collect()
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let archive = super::open(&self.file, self.format)?;
        let rows = rows(&archive)?;

        if self.json {
            for row in &rows {
                let line = serde_json::json!({
                    "index": row.index,
                    "path": row.path,
                    "size": row.size,
                    "type": row.kind,
                    "namespace": row.namespace,
                });
                println!("{}", serde_json::to_string(&line).into_diagnostic()?);
            }
            return Ok(());
        }

        println!(
            "{}",
            format!("{} archive, {} entries", archive.format(), rows.len())
                .if_supports_color(Stdout, |text| text.bold())
        );
        let width = rows.iter().map(|row| row.path.len()).max().unwrap_or(0);
        let mut lines = rows.iter().map(|row| {
            format!(
                "{:>5}  {:<width$}  {:>9}  {:<8}  {}",
                row.index,
                row.path,
                row.size,
                row.kind,
                row.namespace.if_supports_color(Stdout, |text| text.dimmed()),
            )
        });
        println!("{}", lines.join("\n"));
        Ok(())
    }
}
