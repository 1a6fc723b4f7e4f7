use std::collections::BTreeMap;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::trace;

use crate::algorithm::{Algorithm, AlgorithmId};
use crate::device::DeviceId;
use crate::profit::Assignment;
use crate::supervisor::Telemetry;

/// Status of one algorithm across all its miner instances
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgorithmStatus {
    pub algorithm: AlgorithmId,
    pub display_name: String,
    pub hash_functions: Vec<String>,
    pub devices: Vec<DeviceId>,
    /// Speed vector per device, one value per hash function
    pub speeds: BTreeMap<DeviceId, Vec<f64>>,
    pub device_revenue: BTreeMap<DeviceId, f64>,
    pub revenue: f64,
}

impl AlgorithmStatus {
    fn new(algorithm: &Algorithm) -> Self {
        Self {
            algorithm: algorithm.id.clone(),
            display_name: algorithm.display_name.clone(),
            hash_functions: algorithm.hash_functions.clone(),
            devices: Vec::new(),
            speeds: BTreeMap::new(),
            device_revenue: BTreeMap::new(),
            revenue: 0.0,
        }
    }

    fn retain_devices(&mut self, keep: impl Fn(&DeviceId) -> bool) {
        self.devices.retain(|d| keep(d));
        self.speeds.retain(|d, _| keep(d));
        self.device_revenue.retain(|d, _| keep(d));
        self.revenue = self.device_revenue.values().sum();
    }
}

/// Immutable view of everything currently mining
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub algorithms: BTreeMap<AlgorithmId, AlgorithmStatus>,
    /// Payout balance as reported by the balance feed
    pub balance: Option<f64>,
    pub total_revenue: f64,
}

impl StatusSnapshot {
    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }
}

/// Merges telemetry from concurrently polled miners into one snapshot.
///
/// Updates for different algorithms may run concurrently. Within an
/// algorithm the latest write for a device wins.
pub struct StatusAggregator {
    entries: DashMap<AlgorithmId, AlgorithmStatus>,
    balance: RwLock<Option<f64>>,
    publisher: watch::Sender<StatusSnapshot>,
}

impl Default for StatusAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusAggregator {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(StatusSnapshot::default());
        Self {
            entries: DashMap::new(),
            balance: RwLock::new(None),
            publisher,
        }
    }

    /// Merge one instance's telemetry. Not published until [`publish`](Self::publish).
    pub fn update(&self, algorithm: &Algorithm, telemetry: &Telemetry) {
        let mut entry = self
            .entries
            .entry(algorithm.id.clone())
            .or_insert_with(|| AlgorithmStatus::new(algorithm));

        for (device, speeds) in &telemetry.device_speeds {
            entry.speeds.insert(*device, speeds.clone());
            if let Err(pos) = entry.devices.binary_search(device) {
                entry.devices.insert(pos, *device);
            }
        }
        for (device, revenue) in &telemetry.device_revenue {
            entry.device_revenue.insert(*device, *revenue);
        }
        entry.revenue = entry.device_revenue.values().sum();
        trace!("{}: {} device(s), revenue {}", algorithm.id, entry.devices.len(), entry.revenue);
    }

    /// Drop the given devices from one algorithm, leaving others untouched
    pub fn remove_devices(&self, algorithm: &AlgorithmId, devices: &[DeviceId]) {
        if let Some(mut entry) = self.entries.get_mut(algorithm) {
            entry.retain_devices(|d| !devices.contains(d));
        }
        self.entries.remove_if(algorithm, |_, entry| entry.devices.is_empty());
    }

    /// Purge everything not in `assignment` and publish
    pub fn rebuild(&self, assignment: &Assignment) {
        self.entries.retain(|alg, entry| {
            let assigned = assignment.devices(alg);
            entry.retain_devices(|d| assigned.contains(d));
            !entry.devices.is_empty()
        });
        self.publish();
    }

    pub fn set_balance(&self, balance: Option<f64>) {
        *self.balance.write() = balance;
    }

    /// Remove all algorithms and publish
    pub fn clear(&self) {
        self.entries.clear();
        self.publish();
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let algorithms: BTreeMap<AlgorithmId, AlgorithmStatus> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let total_revenue = algorithms.values().map(|a| a.revenue).sum();

        StatusSnapshot {
            algorithms,
            balance: *self.balance.read(),
            total_revenue,
        }
    }

    /// Receiver notified whenever a changed snapshot is published
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.publisher.subscribe()
    }

    /// Publish the current snapshot if it differs from the last one
    pub fn publish(&self) -> bool {
        let snapshot = self.snapshot();
        self.publisher.send_if_modified(move |current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        })
    }
}
