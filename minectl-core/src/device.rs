use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use minectl_hardware::{GpuInfo, HardwareError, Vendor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::algorithm::{AlgorithmCatalog, AlgorithmId};
use crate::backend::BackendKind;
use crate::error::{ConfigError, EnumerationError};
use crate::settings::Settings;

/// Stable device identity, rendered as `nvidia:0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DeviceId {
    pub vendor: Vendor,
    pub index: u32,
}

impl DeviceId {
    pub fn new(vendor: Vendor, index: u32) -> Self {
        Self { vendor, index }
    }

    pub fn nvidia(index: u32) -> Self {
        Self::new(Vendor::Nvidia, index)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vendor, self.index)
    }
}

impl FromStr for DeviceId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidDeviceId(s.to_string());
        let (vendor, index) = s.split_once(':').ok_or_else(invalid)?;
        let vendor = vendor.parse::<Vendor>().map_err(|_| invalid())?;
        let index = index.trim().parse::<u32>().map_err(|_| invalid())?;
        Ok(Self { vendor, index })
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// An enumerated compute device. Immutable after enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub uuid: Option<String>,
    pub memory_mb: u64,
    /// Algorithms this device can run
    pub capabilities: BTreeSet<AlgorithmId>,
}

impl Device {
    pub fn supports(&self, algorithm: &AlgorithmId) -> bool {
        self.capabilities.contains(algorithm)
    }

    /// Short vendor tagged label, e.g. "N:1080 Ti"
    pub fn label(&self) -> String {
        self.id.vendor.label(&self.name)
    }

    /// Build a device from detected hardware, resolving capabilities once
    pub fn from_gpu(gpu: &GpuInfo, catalog: &AlgorithmCatalog) -> Self {
        let backends = supported_backends(gpu.vendor);
        let capabilities = catalog
            .iter()
            .filter(|a| backends.contains(&a.backend))
            .filter(|a| gpu.total_memory_mb >= a.min_memory_mb)
            .map(|a| a.id.clone())
            .collect();

        Self {
            id: DeviceId::new(gpu.vendor, gpu.index),
            name: gpu.name.clone(),
            uuid: gpu.uuid.clone(),
            memory_mb: gpu.total_memory_mb,
            capabilities,
        }
    }
}

/// Miner backends able to drive a vendor's devices
pub fn supported_backends(vendor: Vendor) -> &'static [BackendKind] {
    match vendor {
        Vendor::Nvidia => &[BackendKind::Excavator],
    }
}

/// Source of compute devices
#[cfg_attr(test, mockall::automock)]
pub trait DeviceRegistry: Send + Sync {
    fn enumerate(&self) -> Result<Vec<Device>, EnumerationError>;
}

/// Devices found through NVML
pub struct NvmlDeviceRegistry {
    catalog: AlgorithmCatalog,
}

impl NvmlDeviceRegistry {
    pub fn new(catalog: AlgorithmCatalog) -> Self {
        Self { catalog }
    }
}

impl DeviceRegistry for NvmlDeviceRegistry {
    fn enumerate(&self) -> Result<Vec<Device>, EnumerationError> {
        let gpus = match minectl_hardware::detect_gpus() {
            Ok(gpus) => gpus,
            Err(HardwareError::NoDevicesFound) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let devices: Vec<Device> = gpus
            .iter()
            .map(|gpu| Device::from_gpu(gpu, &self.catalog))
            .collect();

        info!("Enumerated {} device(s)", devices.len());
        for device in &devices {
            debug!(
                "{} {} ({} MiB, {} algorithms)",
                device.id,
                device.name,
                device.memory_mb,
                device.capabilities.len()
            );
        }

        Ok(devices)
    }
}

/// Fixed device list
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceRegistry {
    devices: Vec<Device>,
}

impl StaticDeviceRegistry {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }
}

impl DeviceRegistry for StaticDeviceRegistry {
    fn enumerate(&self) -> Result<Vec<Device>, EnumerationError> {
        Ok(self.devices.clone())
    }
}

/// Enumerate and drop disabled devices. Enumeration failure yields no devices.
pub fn enumerate_usable(registry: &dyn DeviceRegistry, settings: &Settings) -> Vec<Device> {
    match registry.enumerate() {
        Ok(devices) => devices
            .into_iter()
            .filter(|d| !settings.disabled_devices.contains(&d.id))
            .collect(),
        Err(e) => {
            warn!("Device enumeration failed: {}", e);
            Vec::new()
        }
    }
}
