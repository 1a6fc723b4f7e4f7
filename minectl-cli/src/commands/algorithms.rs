use anyhow::Result;
use clap::Args;
use colored::*;
use tabled::{settings::Style, Table, Tabled};

use super::{catalog, print_header};
use crate::config;

/// List known algorithms
#[derive(Args)]
pub struct AlgorithmsArgs {}

#[derive(Tabled)]
struct AlgorithmRow {
    #[tabled(rename = "Algorithm")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Hash functions")]
    hashes: String,
    #[tabled(rename = "Backend")]
    backend: String,
    #[tabled(rename = "Pooled")]
    pooled: String,
    #[tabled(rename = "Min memory")]
    memory: String,
    #[tabled(rename = "Status")]
    status: String,
}

pub async fn execute(_args: AlgorithmsArgs) -> Result<()> {
    let config = config::load_config()?;
    let catalog = catalog();

    print_header("Algorithms");
    let rows: Vec<AlgorithmRow> = catalog
        .iter()
        .map(|a| AlgorithmRow {
            id: a.id.to_string(),
            name: a.display_name.clone(),
            hashes: a.hash_functions.join(" + "),
            backend: a.backend.to_string(),
            pooled: if a.multi_device { "yes" } else { "no" }.to_string(),
            memory: if a.min_memory_mb > 0 {
                format!("{} MiB", a.min_memory_mb)
            } else {
                "-".to_string()
            },
            status: if config.settings.disabled_algorithms.contains(&a.id) {
                "disabled".red().to_string()
            } else {
                "enabled".green().to_string()
            },
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .to_string();
    println!("{}", table);
    Ok(())
}
