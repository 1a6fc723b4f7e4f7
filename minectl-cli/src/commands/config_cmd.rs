use anyhow::Result;
use clap::Args;
use colored::*;
use minectl_core::{AlgorithmId, BalanceUnit, DeviceId};

use crate::config::{get_config_path, load_config, save_config};

/// Show or change persisted settings
#[derive(Args)]
pub struct ConfigArgs {
    /// Print the effective configuration
    #[arg(long)]
    show: bool,

    #[arg(long)]
    wallet: Option<String>,

    #[arg(long)]
    worker: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// Display unit: btc, mbtc or satoshi
    #[arg(long)]
    unit: Option<BalanceUnit>,

    /// Fraction by which a new algorithm must beat the current one
    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long, value_name = "DEVICE")]
    disable_device: Vec<DeviceId>,

    #[arg(long, value_name = "DEVICE")]
    enable_device: Vec<DeviceId>,

    #[arg(long, value_name = "ALGORITHM")]
    disable_algorithm: Vec<String>,

    #[arg(long, value_name = "ALGORITHM")]
    enable_algorithm: Vec<String>,
}

pub async fn execute(args: ConfigArgs) -> Result<()> {
    let mut config = load_config()?;
    let settings = &mut config.settings;
    let mut changed = false;

    if let Some(wallet) = args.wallet {
        settings.pool.wallet = wallet;
        changed = true;
    }
    if let Some(worker) = args.worker {
        settings.pool.worker = worker;
        changed = true;
    }
    if let Some(region) = args.region {
        settings.pool.region = region;
        changed = true;
    }
    if let Some(unit) = args.unit {
        settings.display_unit = unit;
        changed = true;
    }
    if let Some(threshold) = args.threshold {
        settings.switching_threshold = threshold;
        changed = true;
    }
    for device in args.disable_device {
        changed |= settings.disabled_devices.insert(device);
    }
    for device in &args.enable_device {
        changed |= settings.disabled_devices.remove(device);
    }
    for algorithm in args.disable_algorithm {
        changed |= settings.disabled_algorithms.insert(AlgorithmId::new(algorithm));
    }
    for algorithm in args.enable_algorithm {
        changed |= settings.disabled_algorithms.remove(&AlgorithmId::new(algorithm));
    }

    if changed {
        settings.validate()?;
        save_config(&config)?;
        println!(
            "{} Saved {}",
            "✓".green(),
            get_config_path().display()
        );
    }

    if args.show || !changed {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
