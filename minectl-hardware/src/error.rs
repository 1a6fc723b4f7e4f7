use thiserror::Error;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("NVML error: {0}")]
    Nvml(#[from] nvml_wrapper::error::NvmlError),

    #[error("No GPU devices found")]
    NoDevicesFound,

    #[error("Device index {0} out of range")]
    InvalidDeviceIndex(u32),

    #[error("Unknown vendor: {0}")]
    UnknownVendor(String),
}

pub type Result<T> = std::result::Result<T, HardwareError>;
