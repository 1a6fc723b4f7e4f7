use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::*;
use minectl_core::format::{format_balance, format_speeds};
use minectl_core::{
    BalanceUnit, ExcavatorBackend, JsonFileFeed, MinerSupervisor, NvmlDeviceRegistry,
    OrchestrationController, SessionEvent, Settings, StatusSnapshot,
};
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{catalog, load_benchmarks, print_header};
use crate::config::load_config;

/// Start a mining session and run it until Ctrl-C
#[derive(Args)]
pub struct StartArgs {
    /// Wallet address (overrides the config file)
    #[arg(short, long)]
    pub wallet: Option<String>,

    /// Worker name
    #[arg(short = 'n', long)]
    pub worker_name: Option<String>,

    /// Pool region, e.g. eu or usa
    #[arg(short, long)]
    pub region: Option<String>,

    /// Path to the excavator executable
    #[arg(long)]
    pub excavator: Option<String>,

    /// Dry run - validate config without starting
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Algorithm")]
    algorithm: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Speed")]
    speed: String,
    #[tabled(rename = "Revenue")]
    revenue: String,
}

pub async fn execute(args: StartArgs) -> Result<()> {
    let mut config = load_config().context("Failed to load configuration")?;
    if let Some(wallet) = args.wallet {
        config.settings.pool.wallet = wallet;
    }
    if let Some(worker) = args.worker_name {
        config.settings.pool.worker = worker;
    }
    if let Some(region) = args.region {
        config.settings.pool.region = region;
    }
    if let Some(path) = args.excavator {
        config.excavator.executable = path.into();
    }

    if config.settings.pool.wallet.is_empty() {
        bail!("No wallet address configured. Pass --wallet or set settings.pool.wallet");
    }
    config.settings.validate()?;

    let unit = config.settings.display_unit;
    if args.dry_run {
        println!("{}", "✓ Configuration validated successfully".green());
        println!("\n{}", "Configuration:".bold());
        println!("  Pool: {}", config.settings.pool.stratum_url().cyan());
        println!("  User: {}", config.settings.pool.username().white());
        println!("  Excavator: {}", config.excavator.executable.display());
        println!("  Feed: {}", config.feed_path().display());
        return Ok(());
    }

    let catalog = catalog();
    let registry = Arc::new(NvmlDeviceRegistry::new(catalog.clone()));
    let benchmarks = load_benchmarks(&config)?.into_shared();
    let feed = Arc::new(JsonFileFeed::new(config.feed_path()));
    let backend = Arc::new(ExcavatorBackend::new(config.excavator.clone()));
    let supervisor = MinerSupervisor::new(config.orchestrator.supervisor.clone()).with_backend(backend);

    let controller = Arc::new(OrchestrationController::new(
        config.orchestrator.clone(),
        catalog,
        registry,
        benchmarks,
        feed.clone(),
        feed,
        supervisor,
    ));

    let mut status = controller.subscribe_status();
    let mut events = controller.subscribe_events();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    if !start_session(&controller, config.settings.clone(), &mut ctrl_c).await? {
        println!("{}", "Interrupted during startup".yellow());
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let driver = controller.spawn_driver(shutdown.clone());

    println!("{}", "✓ Mining started. Press Ctrl-C to stop.".green());
    if let Some(assignment) = controller.assignment().await {
        if assignment.is_empty() {
            println!(
                "{}",
                "No profitable assignment yet, waiting for prices".yellow()
            );
        }
    }

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                print_snapshot(&snapshot, unit);
            }
            event = events.recv() => match event {
                Ok(SessionEvent::ProcessCrashed(crash)) => {
                    println!("{} {}", "✗".red(), crash);
                }
                Ok(SessionEvent::Restarted(entry)) => {
                    println!("{} Restarted {}", "↻".yellow(), entry);
                }
                Ok(SessionEvent::Reassigned { stopped, started, failed }) => {
                    for entry in &stopped {
                        println!("  {} {}", "-".red(), entry);
                    }
                    for entry in &started {
                        println!("  {} {}", "+".green(), entry);
                    }
                    for entry in &failed {
                        println!("  {} {} failed to start", "!".red(), entry);
                    }
                }
                Ok(SessionEvent::StartFailed(reason)) => {
                    println!("{} {}", "Start failed:".red(), reason);
                }
                Ok(SessionEvent::StateChanged { .. }) => {}
                Err(RecvError::Lagged(missed)) => warn!("Missed {} session events", missed),
                Err(RecvError::Closed) => break,
            },
        }
    }

    shutdown.cancel();
    if let Err(e) = driver.await {
        warn!("Session driver failed: {}", e);
    }
    controller.stop().await;

    let stats = controller.stats();
    println!(
        "{} Stopped after {} optimization cycle(s), {} restart(s)",
        "✓".green(),
        stats.optimize_cycles,
        stats.restarts
    );
    Ok(())
}

/// Start the session unless `interrupt` fires first, in which case the
/// partial start is rolled back. Returns whether mining started.
async fn start_session<F>(
    controller: &Arc<OrchestrationController>,
    settings: Settings,
    interrupt: F,
) -> Result<bool>
where
    F: Future + Unpin,
{
    let mut starting = tokio::spawn({
        let controller = Arc::clone(controller);
        async move { controller.start(settings).await }
    });

    tokio::select! {
        result = &mut starting => {
            result
                .context("Startup task failed")?
                .context("Failed to start mining")?;
            Ok(true)
        }
        _ = interrupt => {
            info!("Interrupted during startup, stopping");
            controller.stop().await;
            if let Ok(Err(e)) = starting.await {
                info!("Startup aborted: {}", e);
            }
            // A start that took the session lock before the stop did
            controller.stop().await;
            Ok(false)
        }
    }
}

fn print_snapshot(snapshot: &StatusSnapshot, unit: BalanceUnit) {
    println!();
    print_header("Status");

    if snapshot.is_empty() {
        println!("{}", "Nothing mining".yellow());
    } else {
        let rows: Vec<StatusRow> = snapshot
            .algorithms
            .values()
            .flat_map(|status| {
                status.devices.iter().map(move |device| StatusRow {
                    algorithm: status.display_name.clone(),
                    device: device.to_string(),
                    speed: status
                        .speeds
                        .get(device)
                        .map(|s| format_speeds(s))
                        .unwrap_or_else(|| "-".to_string()),
                    revenue: status
                        .device_revenue
                        .get(device)
                        .map(|r| format_balance(*r, unit))
                        .unwrap_or_else(|| "-".to_string()),
                })
            })
            .collect();
        let table = Table::new(rows)
            .with(Style::rounded())
            .to_string();
        println!("{}", table);
    }

    println!(
        "  {} {}",
        "Revenue:".bold(),
        format_balance(snapshot.total_revenue, unit).green()
    );
    if let Some(balance) = snapshot.balance {
        println!("  {} {}", "Balance:".bold(), format_balance(balance, unit));
    }
}
