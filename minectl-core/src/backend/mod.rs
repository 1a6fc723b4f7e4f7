//! Miner backends: the processes that actually hash

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;
use crate::device::{Device, DeviceId};
use crate::error::BackendError;

pub mod excavator;

pub use excavator::ExcavatorBackend;

/// Kind of miner program an algorithm runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Excavator,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Excavator => write!(f, "excavator"),
        }
    }
}

/// Opaque handle to a launched miner instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle {
    pub id: u64,
    pub pid: Option<u32>,
}

/// Pool credentials handed to a launched miner
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaunchConfig {
    pub stratum_url: String,
    pub username: String,
}

/// Telemetry reported by a running backend
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackendTelemetry {
    /// Speeds per device, one value per hash function
    pub device_speeds: BTreeMap<DeviceId, Vec<f64>>,

    /// Revenue per device, if the backend computes it
    pub revenue: Option<BTreeMap<DeviceId, f64>>,
}

/// Backend view of a miner instance
#[derive(Debug, Clone, PartialEq)]
pub enum BackendStatus {
    /// Launched but not yet hashing
    Starting,
    Running(BackendTelemetry),
    /// Process is gone. Also reported for unknown handles.
    Exited(Option<i32>),
}

/// A miner program the supervisor can drive
#[async_trait]
pub trait MinerBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Launch an instance mining `algorithm` on `devices`
    async fn launch(
        &self,
        algorithm: &Algorithm,
        devices: &[Device],
        config: &LaunchConfig,
    ) -> Result<BackendHandle, BackendError>;

    async fn status(&self, handle: &BackendHandle) -> Result<BackendStatus, BackendError>;

    /// Ask the instance to exit
    async fn terminate(&self, handle: &BackendHandle) -> Result<(), BackendError>;

    /// Force the instance down
    async fn kill(&self, handle: &BackendHandle) -> Result<(), BackendError>;
}
