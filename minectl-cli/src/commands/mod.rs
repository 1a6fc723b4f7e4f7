pub mod algorithms;
pub mod benchmark;
pub mod config_cmd;
pub mod devices;
pub mod optimize;
pub mod start;

use anyhow::{Context, Result};
use colored::*;
use minectl_core::{AlgorithmCatalog, BenchmarkStore};

use crate::config::AppConfig;

/// Catalog of every algorithm minectl knows about
pub fn catalog() -> AlgorithmCatalog {
    AlgorithmCatalog::excavator()
}

pub fn load_benchmarks(config: &AppConfig) -> Result<BenchmarkStore> {
    let path = config.benchmarks_path();
    BenchmarkStore::load(&path).with_context(|| format!("Failed to load benchmarks from {}", path.display()))
}

pub fn print_header(title: &str) {
    println!("{}", title.bold().cyan());
    println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_black());
}
