// Re-export main components for easy access
pub use detection::{detect_gpus, detect_nvidia_gpus, is_nvml_available, GpuInfo};
pub use error::{HardwareError, Result};
pub use vendor::Vendor;

pub mod detection;
pub mod error;
pub mod vendor;

/// Version of the minectl-hardware library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_nvml_availability() {
        // This will return true/false based on system
        let available = is_nvml_available();
        println!("NVML available: {}", available);
    }
}
