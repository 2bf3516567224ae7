//! aim CLI - compile and play synthesizer patches.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aim")]
#[command(author, version, about = "Node-graph synthesizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a patch and play it
    Run(commands::run::RunArgs),

    /// Play a patch and stream telemetry to stdout
    #[command(hide = true)]
    Worker(commands::worker::WorkerArgs),

    /// Render a patch to a WAV file
    Render(commands::render::RenderArgs),

    /// Print the execution order of a patch
    Order(commands::order::OrderArgs),

    /// List node types and their inlets
    Nodes,

    /// List audio output devices and MIDI inputs
    Devices,
}

fn main() -> anyhow::Result<()> {
    // stdout carries telemetry in worker mode, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Worker(args) => commands::worker::run(args),
        Commands::Render(args) => commands::render::run(args),
        Commands::Order(args) => commands::order::run(args),
        Commands::Nodes => commands::nodes::run(),
        Commands::Devices => commands::devices::run(),
    }
}
