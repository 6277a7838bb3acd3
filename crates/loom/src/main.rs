//! Loom CLI - build-time content pipeline.
//!
//! Provides commands for:
//! - `entries`: List the discovered content entries
//! - `resolve`: Resolve one entry and print it as JSON
//! - `deps`: Show the files and virtual units an entry depends on

mod commands;
mod error;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{DepsArgs, EntriesArgs, ResolveArgs, SiteArgs};
use output::Output;

/// Loom - build-time content pipeline.
#[derive(Parser)]
#[command(name = "loom", version, about)]
struct Cli {
    #[command(flatten)]
    site: SiteArgs,

    /// Enable verbose output (debug logs for every pipeline pass).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered content entries.
    Entries(EntriesArgs),
    /// Resolve an entry and print the resolved page as JSON.
    Resolve(ResolveArgs),
    /// Show the dependency files and virtual units of an entry.
    Deps(DepsArgs),
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    // --verbose enables DEBUG level, otherwise use RUST_LOG or default to WARN
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Entries(args) => args.execute(&cli.site, &output),
        Commands::Resolve(args) => args.execute(&cli.site, &output),
        Commands::Deps(args) => args.execute(&cli.site, &output),
    };

    if let Err(err) = result {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}
