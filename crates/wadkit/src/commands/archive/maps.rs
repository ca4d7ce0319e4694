use std::path::PathBuf;

use clap::Args;
use miette::Result;
use owo_colors::{OwoColorize, Stream::Stdout};
use wadkit_archive::ArchiveFormat;

#[derive(Args)]
pub struct MapsArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Parse the input as this format instead of detecting it
    #[arg(long)]
    format: Option<ArchiveFormat>,
}

impl MapsArgs {
    pub fn handle(&self) -> Result<()> {
        let archive = super::open(&self.file, self.format)?;
        let maps = archive.detect_maps();
        if maps.is_empty() {
            println!("no maps found");
            return Ok(());
        }

        for map in maps {
            let location = if map.archive {
                archive.entry_path(&map.head).unwrap_or_default()
            } else {
                let head = archive.entry_index(&map.head).unwrap_or_default();
                let end = archive.entry_index(&map.end).unwrap_or_default();
                format!("lumps {head}..={end}")
            };

            let mut notes = Vec::new();
            if map.extended_nodes {
                notes.push("extended nodes".to_owned());
            }
            if !map.unknown.is_empty() {
                notes.push(format!("{} unknown lumps", map.unknown.len()));
            }

            println!(
                "{:<8} {:<8} {} {}",
                map.name.if_supports_color(Stdout, |text| text.bold()),
                map.format,
                location,
                notes
                    .join(", ")
                    .if_supports_color(Stdout, |text| text.dimmed()),
            );
        }
        Ok(())
    }
}
