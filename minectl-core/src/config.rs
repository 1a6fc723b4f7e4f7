use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Miner supervision timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Time a miner has to report ready (milliseconds)
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Grace period after a terminate request before force-killing (milliseconds)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Deadline for a single status poll (milliseconds)
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// First readiness check interval (milliseconds)
    #[serde(default = "default_ready_backoff_initial_ms")]
    pub ready_backoff_initial_ms: u64,

    /// Cap on the readiness check interval (milliseconds)
    #[serde(default = "default_ready_backoff_max_ms")]
    pub ready_backoff_max_ms: u64,

    /// Consecutive missed polls before a miner is declared crashed
    #[serde(default = "default_max_missed_polls")]
    pub max_missed_polls: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            ready_backoff_initial_ms: default_ready_backoff_initial_ms(),
            ready_backoff_max_ms: default_ready_backoff_max_ms(),
            max_missed_polls: default_max_missed_polls(),
        }
    }
}

impl SupervisorConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn ready_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.ready_backoff_initial_ms)
    }

    pub fn ready_backoff_max(&self) -> Duration {
        Duration::from_millis(self.ready_backoff_max_ms)
    }
}

/// Session driver timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Telemetry poll interval (milliseconds)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Periodic reoptimization interval (seconds)
    #[serde(default = "default_reoptimize_interval_secs")]
    pub reoptimize_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            tick_interval_ms: default_tick_interval_ms(),
            reoptimize_interval_secs: default_reoptimize_interval_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reoptimize_interval(&self) -> Duration {
        Duration::from_secs(self.reoptimize_interval_secs)
    }
}

// Default value functions for serde
fn default_startup_timeout_ms() -> u64 { 30_000 }
fn default_shutdown_timeout_ms() -> u64 { 5_000 }
fn default_poll_timeout_ms() -> u64 { 2_000 }
fn default_ready_backoff_initial_ms() -> u64 { 100 }
fn default_ready_backoff_max_ms() -> u64 { 1_000 }
fn default_max_missed_polls() -> u32 { 3 }
fn default_tick_interval_ms() -> u64 { 1_000 }
fn default_reoptimize_interval_secs() -> u64 { 60 }
