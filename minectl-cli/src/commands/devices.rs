use anyhow::Result;
use clap::Args;
use colored::*;
use minectl_core::{DeviceRegistry, NvmlDeviceRegistry};
use tabled::{settings::Style, Table, Tabled};

use super::{catalog, print_header};
use crate::config;

/// List detected devices
#[derive(Args)]
pub struct DevicesArgs {
    /// Output in JSON format
    #[arg(short, long)]
    json: bool,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Device")]
    id: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Algorithms")]
    algorithms: usize,
    #[tabled(rename = "Status")]
    status: String,
}

pub async fn execute(args: DevicesArgs) -> Result<()> {
    let config = config::load_config()?;
    let registry = NvmlDeviceRegistry::new(catalog());

    let devices = match registry.enumerate() {
        Ok(devices) => devices,
        Err(e) => {
            println!("{} {}", "Device detection failed:".red(), e);
            return Ok(());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    print_header("Devices");
    if devices.is_empty() {
        println!("{}", "No supported devices found".yellow());
        if !minectl_hardware::is_nvml_available() {
            println!("{}", "NVML could not be loaded; is the NVIDIA driver installed?".bright_black());
        }
        return Ok(());
    }

    let rows: Vec<DeviceRow> = devices
        .iter()
        .map(|d| DeviceRow {
            id: d.id.to_string(),
            label: d.label(),
            name: d.name.clone(),
            memory: format!("{} MiB", d.memory_mb),
            algorithms: d.capabilities.len(),
            status: if config.settings.disabled_devices.contains(&d.id) {
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
