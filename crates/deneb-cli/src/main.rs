mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deneb", about = "Deep-sky image integration tool")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Integrate a set of calibrated frames
    Integrate(commands::integrate::IntegrateArgs),
    /// Show frame container metadata
    Info(commands::info::InfoArgs),
    /// Print a full default integration run file as TOML
    Config,
    /// Inspect or clear the frame statistics cache
    Cache(commands::cache::CacheArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Integrate(args) => commands::integrate::run(args),
        Commands::Info(args) => commands::info::run(args),
        Commands::Config => commands::config::run(),
        Commands::Cache(args) => commands::cache::run(args),
    }
}
