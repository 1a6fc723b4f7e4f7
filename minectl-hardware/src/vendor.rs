use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HardwareError;

/// GPU vendor profile.
///
/// Resolved once when a device is detected; everything vendor specific
/// (labels, supported miner backends) hangs off this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Nvidia,
}

impl Vendor {
    /// Lowercase identifier used in device ids (`nvidia:0`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Nvidia => "nvidia",
        }
    }

    /// Single letter tag used in compact device lists
    pub fn tag(&self) -> char {
        match self {
            Vendor::Nvidia => 'N',
        }
    }

    /// Marketing words stripped from model names for display
    fn noise_words(&self) -> &'static [&'static str] {
        match self {
            Vendor::Nvidia => &["NVIDIA", "GeForce", "GTX", "RTX"],
        }
    }

    /// Shorten a model name, e.g. "GeForce GTX 1080 Ti" -> "1080 Ti"
    pub fn short_name(&self, model: &str) -> String {
        let mut name = model.to_string();
        for word in self.noise_words() {
            name = name.replace(word, "");
        }
        name.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Compact label, e.g. "N:1080 Ti"
    pub fn label(&self, model: &str) -> String {
        format!("{}:{}", self.tag(), self.short_name(model))
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nvidia" | "n" => Ok(Vendor::Nvidia),
            other => Err(HardwareError::UnknownVendor(other.to_string())),
        }
    }
}
