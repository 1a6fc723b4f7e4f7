use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;

use commands::*;

/// minectl - profit switching GPU mining orchestrator
#[derive(Parser)]
#[command(name = "minectl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start mining
    Start(start::StartArgs),

    /// Show the most profitable assignment without mining
    Optimize(optimize::OptimizeArgs),

    /// Manage benchmarks
    Benchmark(benchmark::BenchmarkArgs),

    /// List detected devices
    Devices(devices::DevicesArgs),

    /// List supported algorithms
    Algorithms(algorithms::AlgorithmsArgs),

    /// Configuration management
    Config(config_cmd::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(cli.verbose > 1)
        .init();

    if let Some(config_path) = &cli.config {
        config::set_config_path(config_path);
    }

    match cli.command {
        Commands::Start(args) => start::execute(args).await?,
        Commands::Optimize(args) => optimize::execute(args).await?,
        Commands::Benchmark(args) => benchmark::execute(args).await?,
        Commands::Devices(args) => devices::execute(args).await?,
        Commands::Algorithms(args) => algorithms::execute(args).await?,
        Commands::Config(args) => config_cmd::execute(args).await?,
    }

    Ok(())
}
