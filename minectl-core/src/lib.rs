//! Mining orchestration core
//!
//! Enumerates devices, picks the most profitable algorithm for each one,
//! supervises the miner processes doing the work and merges their
//! telemetry into a single status snapshot.

pub mod algorithm;
pub mod backend;
pub mod benchmark;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod feeds;
pub mod format;
pub mod profit;
pub mod settings;
pub mod status;
pub mod supervisor;

// Re-export main types
pub use algorithm::{Algorithm, AlgorithmCatalog, AlgorithmId};
pub use backend::{
    BackendHandle, BackendKind, BackendStatus, BackendTelemetry, ExcavatorBackend, LaunchConfig,
    MinerBackend,
};
pub use benchmark::{BenchmarkStore, SharedBenchmarks};
pub use config::{OrchestratorConfig, SupervisorConfig};
pub use controller::{
    ControllerStats, OrchestrationController, ReoptimizeOutcome, SessionEvent, SessionState,
    TickReport,
};
pub use device::{
    enumerate_usable, Device, DeviceId, DeviceRegistry, NvmlDeviceRegistry, StaticDeviceRegistry,
};
pub use error::{
    BackendError, BenchmarkError, ConfigError, CrashError, EnumerationError, SessionError,
    StartupError,
};
pub use feeds::{BalanceFeed, JsonFileFeed, PriceFeed, PriceMap, StaticBalanceFeed, StaticPriceFeed};
pub use profit::{Assignment, AssignmentEntry, ProfitabilityEngine};
pub use settings::{BalanceUnit, PoolSettings, Settings};
pub use status::{AlgorithmStatus, StatusAggregator, StatusSnapshot};
pub use supervisor::{
    HealthState, MinerProcess, MinerSupervisor, PollReport, ProcessState, StopOutcome, Telemetry,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
