use anyhow::{anyhow, bail, Result};
use clap::Args;
use colored::*;
use minectl_core::format::{format_balance, format_speeds};
use minectl_core::{
    enumerate_usable, JsonFileFeed, NvmlDeviceRegistry, PriceFeed, PriceMap, ProfitabilityEngine,
};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use super::{catalog, load_benchmarks, print_header};
use crate::config;

/// Show the most profitable assignment for the current prices
#[derive(Args)]
pub struct OptimizeArgs {
    /// Override a price, e.g. --price equihash=0.00012
    #[arg(short, long = "price", value_name = "HASH=PRICE")]
    prices: Vec<String>,

    /// Output in JSON format
    #[arg(short, long)]
    json: bool,
}

#[derive(Tabled, Serialize)]
struct AssignmentRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Algorithm")]
    algorithm: String,
    #[tabled(rename = "Speed")]
    speed: String,
    #[tabled(rename = "Revenue")]
    revenue: String,
    #[tabled(rename = "Next best")]
    next_best: String,
    #[tabled(skip)]
    revenue_btc: f64,
}

fn parse_price(arg: &str) -> Result<(String, f64)> {
    let (hash, price) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected HASH=PRICE, got '{}'", arg))?;
    let price: f64 = price
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid price '{}' for {}", price, hash))?;
    if !price.is_finite() || price < 0.0 {
        bail!("Price for {} must be a non-negative number", hash);
    }
    Ok((hash.trim().to_string(), price))
}

pub async fn execute(args: OptimizeArgs) -> Result<()> {
    let config = config::load_config()?;
    let settings = &config.settings;
    let benchmarks = load_benchmarks(&config)?;
    let catalog = catalog().without(&settings.disabled_algorithms);

    let mut prices: PriceMap = JsonFileFeed::new(config.feed_path())
        .current_prices()
        .unwrap_or_default();
    for arg in &args.prices {
        let (hash, price) = parse_price(arg)?;
        prices.insert(hash, price);
    }
    if prices.is_empty() {
        bail!(
            "No prices available. Write them to {} or pass --price",
            config.feed_path().display()
        );
    }

    let registry = NvmlDeviceRegistry::new(catalog.clone());
    let devices = enumerate_usable(&registry, settings);
    if devices.is_empty() {
        bail!("No usable devices");
    }

    let engine = ProfitabilityEngine::new(settings.switching_threshold);
    let assignment = engine.optimize(&devices, &catalog, &benchmarks, &prices);

    let mut rows = Vec::new();
    for device in &devices {
        let options = engine.options(device, &catalog, &benchmarks, &prices);
        let (algorithm, speed, revenue) = match assignment.algorithm_for(&device.id) {
            Some(alg) => {
                let revenue = options
                    .iter()
                    .find(|(id, _)| id == alg)
                    .map(|(_, r)| *r)
                    .unwrap_or(0.0);
                let speed = benchmarks
                    .get(&device.id, alg)
                    .map(format_speeds)
                    .unwrap_or_default();
                (alg.to_string(), speed, revenue)
            }
            None => ("idle".to_string(), "-".to_string(), 0.0),
        };
        rows.push(AssignmentRow {
            device: device.label(),
            algorithm,
            speed,
            revenue: format_balance(revenue, settings.display_unit),
            next_best: options
                .iter()
                .find(|(id, _)| assignment.algorithm_for(&device.id) != Some(id))
                .map(|(id, r)| format!("{} ({})", id, format_balance(*r, settings.display_unit)))
                .unwrap_or_else(|| "-".to_string()),
            revenue_btc: revenue,
        });
    }

    let total = engine.assignment_revenue(&assignment, &devices, &catalog, &benchmarks, &prices);

    if args.json {
        let output = serde_json::json!({
            "assignment": assignment,
            "devices": rows,
            "total_revenue": total,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_header("Optimal assignment");
    let table = Table::new(&rows)
        .with(Style::rounded())
        .to_string();
    println!("{}", table);
    println!(
        "\n  {} {}",
        "Total:".bold(),
        format_balance(total, settings.display_unit).green()
    );

    Ok(())
}
