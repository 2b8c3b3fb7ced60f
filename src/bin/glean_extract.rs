// Extract impact results into CSV files
//
// Usage: glean_extract <config.yml> [--key=value ...] <impact> [<impact> ...]
//   impact: name | name:column | :column | -name

use glean_rust::reader::NetcdfOpener;
use glean_rust::{interpret_filenames, ExtractConfig, Extractor, WalkOutcome};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    let (config, positional) = match ExtractConfig::from_args(std::env::args().skip(1)) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let default_filter = if config.verbose { "glean_rust=debug,warn" } else { "glean_rust=info,warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if positional.is_empty() {
        eprintln!("Usage: glean_extract <config.yml> [--key=value ...] <impact> [<impact> ...]");
        return ExitCode::FAILURE;
    }

    match run(config, &positional) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: ExtractConfig, positional: &[String]) -> anyhow::Result<()> {
    let impacts = interpret_filenames(positional, &config)?;
    tracing::info!("Extracting {} impacts", impacts.len());

    let opener = NetcdfOpener;
    let summary = Extractor::new(config, &opener).run(&impacts)?;

    if let WalkOutcome::Found(n) = summary.outcome {
        tracing::info!("{} targets, {} rows in {} files", n, summary.rows, summary.files.len());
    }
    for path in &summary.files {
        println!("{}", path.display());
    }

    Ok(())
}
