use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::warn;

/// Price per unit of speed for each hash function, keyed by hash function name
pub type PriceMap = BTreeMap<String, f64>;

/// Source of current per-hash-function prices
#[cfg_attr(test, mockall::automock)]
pub trait PriceFeed: Send + Sync {
    /// `None` when no price data is available
    fn current_prices(&self) -> Option<PriceMap>;
}

/// Source of the current payout balance
#[cfg_attr(test, mockall::automock)]
pub trait BalanceFeed: Send + Sync {
    fn current_balance(&self) -> Option<f64>;
}

/// In-memory price feed
#[derive(Debug, Default)]
pub struct StaticPriceFeed {
    prices: RwLock<Option<PriceMap>>,
}

impl StaticPriceFeed {
    pub fn new(prices: PriceMap) -> Self {
        Self {
            prices: RwLock::new(Some(prices)),
        }
    }

    pub fn set(&self, prices: PriceMap) {
        *self.prices.write() = Some(prices);
    }

    pub fn clear(&self) {
        *self.prices.write() = None;
    }
}

impl PriceFeed for StaticPriceFeed {
    fn current_prices(&self) -> Option<PriceMap> {
        self.prices.read().clone()
    }
}

/// In-memory balance feed
#[derive(Debug, Default)]
pub struct StaticBalanceFeed {
    balance: RwLock<Option<f64>>,
}

impl StaticBalanceFeed {
    pub fn new(balance: Option<f64>) -> Self {
        Self {
            balance: RwLock::new(balance),
        }
    }

    pub fn set(&self, balance: Option<f64>) {
        *self.balance.write() = balance;
    }
}

impl BalanceFeed for StaticBalanceFeed {
    fn current_balance(&self) -> Option<f64> {
        *self.balance.read()
    }
}

#[derive(Debug, Deserialize)]
struct FeedFile {
    #[serde(default)]
    prices: Option<PriceMap>,
    #[serde(default)]
    balance: Option<f64>,
}

/// Price and balance read from a JSON file kept up to date by another process:
///
/// ```json
/// {"prices": {"equihash": 0.00012}, "balance": 0.0042}
/// ```
///
/// The file is re-read on every call; unreadable files yield no data.
#[derive(Debug, Clone)]
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Option<FeedFile> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Cannot read feed file {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!("Invalid feed file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl PriceFeed for JsonFileFeed {
    fn current_prices(&self) -> Option<PriceMap> {
        self.read().and_then(|f| f.prices)
    }
}

impl BalanceFeed for JsonFileFeed {
    fn current_balance(&self) -> Option<f64> {
        self.read().and_then(|f| f.balance)
    }
}
