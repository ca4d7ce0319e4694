use std::{fs, path::PathBuf};

use clap::Args;
use itertools::Itertools;
use miette::{Context, IntoDiagnostic, Result};
use wadkit_archive::sniff;

#[derive(Args)]
pub struct SniffArgs {
    /// Files to classify
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Print one JSON object per file
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl SniffArgs {
    pub fn handle(&self) -> Result<()> {
        let registry = sniff::global();

        for path in &self.files {
            let data = fs::read(path)
                .into_diagnostic()
                .context(format!("path: {}", path.display()))?;
            let matches = registry
                .classify_all(&data)
                .into_iter()
                .sorted_by(|a, b| b.1.cmp(&a.1))
                .collect::<Vec<_>>();
            let best = registry.classify(&data).map(|(id, _)| id);

            if self.json {
                let descriptor = best.and_then(|id| registry.descriptor(id));
                let line = serde_json::json!({
                    "path": path.display().to_string(),
                    "type": best,
                    "descriptor": descriptor,
                    "matches": matches
                        .iter()
                        .map(|(id, confidence)| (id.to_string(), confidence.to_string()))
                        .collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string(&line).into_diagnostic()?);
                continue;
            }

            let summary = matches
                .iter()
                .map(|(id, confidence)| format!("{id} ({confidence})"))
                .join(", ");
            println!(
                "{}: {} [{}]",
                path.display(),
                best.unwrap_or("unknown"),
                summary
            );
        }
        Ok(())
    }
}
