//! km CLI - Markdown preview with Kroki diagrams.
//!
//! Provides commands for:
//! - `render`: Render a markdown file to HTML once all diagram blocks resolve
//! - `encode`: Print the Kroki URL for a diagram source
//! - `watch`: Re-render a markdown file whenever it changes

mod commands;
mod error;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{EncodeArgs, RenderArgs, WatchArgs};
use output::Output;

/// km - Markdown preview with Kroki diagrams.
#[derive(Parser)]
#[command(name = "km", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a markdown file to HTML.
    Render(RenderArgs),
    /// Print the Kroki URL for a diagram source.
    Encode(EncodeArgs),
    /// Re-render a markdown file on every change.
    Watch(WatchArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let output = Output::new();

    let verbose = match &cli.command {
        Commands::Render(args) => args.session.verbose,
        Commands::Watch(args) => args.session.verbose,
        Commands::Encode(_) => false,
    };

    // Initialize tracing with appropriate log level
    // --verbose enables INFO level, otherwise use RUST_LOG or default to WARN
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Render(args) => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(args.execute())
        }
        Commands::Encode(args) => args.execute(),
        Commands::Watch(args) => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(args.execute())
        }
    };

    if let Err(err) = result {
        output.error(&format!("Error: {err}"));
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
