use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmId;
use crate::device::DeviceId;
use crate::error::ConfigError;

/// Unit balances are displayed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceUnit {
    #[default]
    Btc,
    Mbtc,
    Satoshi,
}

impl fmt::Display for BalanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceUnit::Btc => write!(f, "BTC"),
            BalanceUnit::Mbtc => write!(f, "mBTC"),
            BalanceUnit::Satoshi => write!(f, "sat"),
        }
    }
}

impl FromStr for BalanceUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "btc" => Ok(BalanceUnit::Btc),
            "mbtc" => Ok(BalanceUnit::Mbtc),
            "sat" | "satoshi" => Ok(BalanceUnit::Satoshi),
            other => Err(ConfigError::InvalidValue {
                field: "display_unit".to_string(),
                message: format!("unknown unit '{}'", other),
            }),
        }
    }
}

/// Pool credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Payout address
    #[serde(default)]
    pub wallet: String,

    #[serde(default = "default_worker")]
    pub worker: String,

    /// NiceHash region, e.g. "eu" or "usa"
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            wallet: String::new(),
            worker: default_worker(),
            region: default_region(),
        }
    }
}

impl PoolSettings {
    pub fn stratum_url(&self) -> String {
        format!("nhmp.{}.nicehash.com:3200", self.region)
    }

    pub fn username(&self) -> String {
        format!("{}.{}", self.wallet, self.worker)
    }
}

/// User settings read at session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub disabled_devices: BTreeSet<DeviceId>,

    #[serde(default)]
    pub disabled_algorithms: BTreeSet<AlgorithmId>,

    #[serde(default)]
    pub display_unit: BalanceUnit,

    /// Fraction by which a new algorithm must beat the running one
    /// before a device is switched during reoptimization
    #[serde(default = "default_switching_threshold")]
    pub switching_threshold: f64,

    #[serde(default)]
    pub pool: PoolSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            disabled_devices: BTreeSet::new(),
            disabled_algorithms: BTreeSet::new(),
            display_unit: BalanceUnit::default(),
            switching_threshold: default_switching_threshold(),
            pool: PoolSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.switching_threshold.is_finite() || self.switching_threshold < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "switching_threshold".to_string(),
                message: format!("must be a non-negative number, got {}", self.switching_threshold),
            });
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_worker() -> String { "worker".to_string() }
fn default_region() -> String { "eu".to_string() }
fn default_switching_threshold() -> f64 { 0.1 }
