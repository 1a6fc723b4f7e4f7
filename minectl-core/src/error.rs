use std::time::Duration;

use thiserror::Error;

use crate::algorithm::AlgorithmId;
use crate::backend::BackendKind;
use crate::controller::SessionState;
use crate::device::DeviceId;

/// Device enumeration failed. Treated as an empty device set.
#[derive(Error, Debug)]
pub enum EnumerationError {
    #[error("Hardware query failed: {0}")]
    Hardware(#[from] minectl_hardware::HardwareError),

    #[error("Device enumeration failed: {0}")]
    Platform(String),
}

/// Errors reported by a miner backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Excavator error: {0}")]
    Excavator(#[from] minectl_excavator::ExcavatorError),

    #[error("Unknown miner handle {0}")]
    UnknownHandle(u64),

    #[error("Backend does not support {0}")]
    Unsupported(String),

    #[error("Backend error: {0}")]
    Other(String),
}

/// A miner instance failed to reach Running
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("No backend registered for {0}")]
    NoBackend(BackendKind),

    #[error("Failed to launch {algorithm}: {source}")]
    Launch {
        algorithm: AlgorithmId,
        #[source]
        source: BackendError,
    },

    #[error("{algorithm} did not become ready within {timeout:?}")]
    Timeout {
        algorithm: AlgorithmId,
        timeout: Duration,
    },

    #[error("{algorithm} exited during startup (code {code:?})")]
    Exited {
        algorithm: AlgorithmId,
        code: Option<i32>,
    },

    #[error("Startup of {0} was cancelled")]
    Cancelled(AlgorithmId),
}

/// A running miner instance crashed
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{algorithm} crashed on {devices:?}: {reason}")]
pub struct CrashError {
    pub algorithm: AlgorithmId,
    pub devices: Vec<DeviceId>,
    pub reason: String,
}

/// Session level failures surfaced to the user
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to start mining: {0}")]
    StartFailed(#[from] StartupError),

    #[error("No usable devices")]
    NoUsableDevices,

    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] ConfigError),

    #[error("Invalid session state: expected {expected:?}, was {actual:?}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("Session start was cancelled")]
    Cancelled,
}

/// Benchmark persistence errors
#[derive(Error, Debug)]
pub enum BenchmarkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid benchmark file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;
