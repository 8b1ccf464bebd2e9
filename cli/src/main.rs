//! CLI for tracelens
//!
//! Two commands:
//! - demo: run a simulated GPU workload through the full collection pipeline
//! - launch: start a program with trace collection activated

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod export;

#[derive(Parser)]
#[command(name = "tracelens")]
#[command(about = "tracelens - GPU operation tracing collector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated workload through the collector and report timings
    Demo(commands::demo::DemoArgs),

    /// Launch a program with trace collection activated
    Launch(commands::launch::LaunchArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo(args) => {
            init_tracing(args.verbose);
            commands::demo::run(args)
        }
        Commands::Launch(args) => {
            init_tracing(args.verbose);
            commands::launch::run(args)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
