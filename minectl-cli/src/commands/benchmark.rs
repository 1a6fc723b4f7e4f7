use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::*;
use minectl_core::format::format_speeds;
use minectl_core::{AlgorithmId, DeviceId};
use tabled::{settings::Style, Table, Tabled};

use super::{catalog, load_benchmarks, print_header};
use crate::config;

/// Manage stored benchmarks
#[derive(Args)]
pub struct BenchmarkArgs {
    #[command(subcommand)]
    command: BenchmarkCommand,
}

#[derive(Subcommand)]
enum BenchmarkCommand {
    /// Record the speed of an algorithm on a device
    Set {
        /// Device id, e.g. nvidia:0
        device: String,
        /// Algorithm id, e.g. excavator_equihash
        algorithm: String,
        /// Speed in H/s for each hash function of the algorithm
        #[arg(required = true)]
        speeds: Vec<f64>,
    },

    /// Show stored benchmarks
    List,

    /// Forget a benchmark
    Remove {
        device: String,
        algorithm: String,
    },
}

#[derive(Tabled)]
struct BenchmarkRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Algorithm")]
    algorithm: String,
    #[tabled(rename = "Speed")]
    speed: String,
}

pub async fn execute(args: BenchmarkArgs) -> Result<()> {
    let config = config::load_config()?;
    let path = config.benchmarks_path();
    let mut store = load_benchmarks(&config)?;

    match args.command {
        BenchmarkCommand::Set {
            device,
            algorithm,
            speeds,
        } => {
            let device: DeviceId = device.parse()?;
            let algorithm = AlgorithmId::new(algorithm);
            let catalog = catalog();
            let entry = catalog
                .get(&algorithm)
                .with_context(|| format!("Unknown algorithm '{}'", algorithm))?;
            if speeds.len() != entry.hash_functions.len() {
                bail!(
                    "{} needs {} speed(s) ({}), got {}",
                    algorithm,
                    entry.hash_functions.len(),
                    entry.hash_functions.join(", "),
                    speeds.len()
                );
            }
            if speeds.iter().any(|s| !s.is_finite() || *s < 0.0) {
                bail!("Speeds must be non-negative numbers");
            }

            println!(
                "{} {} on {}: {}",
                "✓".green(),
                algorithm,
                device,
                format_speeds(&speeds)
            );
            store.set(device, algorithm, speeds);
            store.save(&path)?;
        }
        BenchmarkCommand::List => {
            print_header("Benchmarks");
            if store.is_empty() {
                println!("{}", "No benchmarks recorded".yellow());
                return Ok(());
            }
            let rows: Vec<BenchmarkRow> = store
                .iter()
                .map(|(device, algorithm, speeds)| BenchmarkRow {
                    device: device.to_string(),
                    algorithm: algorithm.to_string(),
                    speed: format_speeds(speeds),
                })
                .collect();
            let table = Table::new(rows)
                .with(Style::rounded())
                .to_string();
            println!("{}", table);
        }
        BenchmarkCommand::Remove { device, algorithm } => {
            let device: DeviceId = device.parse()?;
            let algorithm = AlgorithmId::new(algorithm);
            match store.remove(&device, &algorithm) {
                Some(_) => {
                    store.save(&path)?;
                    println!("{} Removed {} on {}", "✓".green(), algorithm, device);
                }
                None => println!("{}", format!("No benchmark for {} on {}", algorithm, device).yellow()),
            }
        }
    }

    Ok(())
}
