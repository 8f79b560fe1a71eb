//! audiohal CLI - inspect topologies, simulate routing and convert PCM.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audiohal")]
#[command(author, version, about = "audiohal routing core CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ports, groups, routes and criteria of a topology
    Inspect(commands::inspect::InspectArgs),

    /// Run a routing cycle for a set of streams against a topology
    Route(commands::route::RouteArgs),

    /// Plan or run a sample conversion between two specs
    Convert(commands::convert::ConvertArgs),

    /// Show or edit the persisted parameter store
    Params(commands::params::ParamsArgs),

    /// Send a RECOVER or CRASH event to the uevent emulation socket
    Uevent(commands::uevent::UeventArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Route(args) => commands::route::run(args),
        Commands::Convert(args) => commands::convert::run(args),
        Commands::Params(args) => commands::params::run(args),
        Commands::Uevent(args) => commands::uevent::run(args),
    }
}
