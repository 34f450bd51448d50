// ABOUTME: Entry point for the dockhand CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands, Format};
use dockhand::error::Result;
use output::{Output, OutputMode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = match cli.output {
        Format::Normal => OutputMode::Normal,
        Format::Quiet => OutputMode::Quiet,
        Format::Json => OutputMode::Json,
    };

    if let Err(e) = run(cli.command, mode).await {
        Output::new(mode).error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(command: Commands, mode: OutputMode) -> Result<()> {
    let output = Output::new(mode);
    match command {
        Commands::Serve(args) => commands::serve(args, output).await,
        Commands::Image(command) => commands::image(command, output).await,
        Commands::Container(command) => commands::container(command, output).await,
        Commands::Volume(command) => commands::volume(command, output).await,
    }
}
