use std::{fs::File, io::BufReader, io::IsTerminal, path::PathBuf};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use miette::{Context, IntoDiagnostic, Result};
use tracing::info;
use tracing_log::AsTrace;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wadkit_archive::sniff::{self, FormatRegistry};

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// A JSON table of format descriptors merged over the builtin one
    #[arg(long, global = true, value_name = "FILE")]
    formats: Option<PathBuf>,

    #[command(subcommand)]
    command: wadkit::commands::Commands,
}

fn main() -> Result<()> {
    better_panic::install();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .without_time()
                .compact(),
        )
        .with(
            EnvFilter::builder()
                .with_default_directive(cli.verbose.log_level_filter().as_trace().into())
                .from_env_lossy(),
        )
        .try_init()
        .into_diagnostic()?;

    let mut registry = FormatRegistry::builtin();
    if let Some(path) = &cli.formats {
        let file = File::open(path)
            .into_diagnostic()
            .context(format!("path: {}", path.display()))?;
        let count = registry
            .load_descriptors_json(BufReader::new(file))
            .context(format!("loading format table {}", path.display()))?;
        info!(count, "loaded format descriptors");
    }
    sniff::init(registry);

    let result = cli.command.handle();
    sniff::teardown();
    result
}
