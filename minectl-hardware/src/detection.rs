use nvml_wrapper::Nvml;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{HardwareError, Result};
use crate::vendor::Vendor;

/// Basic information about a detected GPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub vendor: Vendor,
    pub index: u32,
    pub name: String,
    pub uuid: Option<String>,
    pub pci_bus_id: Option<String>,
    pub total_memory_mb: u64,
}

impl GpuInfo {
    /// Compact display label, e.g. "N:1080 Ti"
    pub fn label(&self) -> String {
        self.vendor.label(&self.name)
    }
}

/// Detect all NVIDIA GPUs visible to NVML
pub fn detect_nvidia_gpus() -> Result<Vec<GpuInfo>> {
    info!("Detecting NVIDIA devices...");

    let nvml = Nvml::init().map_err(|e| {
        warn!("Failed to initialize NVML: {}", e);
        e
    })?;

    let device_count = nvml.device_count()?;
    if device_count == 0 {
        warn!("No NVIDIA devices found");
        return Err(HardwareError::NoDevicesFound);
    }

    info!("NVML found {} GPU(s)", device_count);

    let mut gpus = Vec::new();
    for index in 0..device_count {
        let device = match nvml.device_by_index(index) {
            Ok(device) => device,
            Err(e) => {
                warn!("Failed to query GPU {}: {}", index, e);
                continue;
            }
        };

        let name = device.name()?;
        let total_memory_mb = device.memory_info()?.total / 1024 / 1024;
        let uuid = device.uuid().ok();
        let pci_bus_id = device.pci_info().ok().map(|pci| pci.bus_id);

        debug!("GPU {}: {} ({}MB)", index, name, total_memory_mb);

        gpus.push(GpuInfo {
            vendor: Vendor::Nvidia,
            index,
            name,
            uuid,
            pci_bus_id,
            total_memory_mb,
        });
    }

    if gpus.is_empty() {
        return Err(HardwareError::NoDevicesFound);
    }

    Ok(gpus)
}

/// Detect GPUs from every supported vendor
pub fn detect_gpus() -> Result<Vec<GpuInfo>> {
    detect_nvidia_gpus()
}

/// Check whether NVML can be loaded on this system
pub fn is_nvml_available() -> bool {
    Nvml::init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_detection() {
        // Only meaningful on systems with an NVIDIA driver
        if is_nvml_available() {
            match detect_gpus() {
                Ok(gpus) => {
                    assert!(!gpus.is_empty());
                    let first = &gpus[0];
                    assert!(!first.name.is_empty());
                    assert!(first.total_memory_mb > 0);
                }
                Err(e) => println!("No usable GPUs: {}", e),
            }
        } else {
            println!("NVML not available, skipping test");
        }
    }

    #[test]
    fn test_label() {
        let info = GpuInfo {
            vendor: Vendor::Nvidia,
            index: 0,
            name: "GeForce GTX 1070".to_string(),
            uuid: None,
            pci_bus_id: None,
            total_memory_mb: 8192,
        };
        assert_eq!(info.label(), "N:1070");
    }
}
