use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::algorithm::{Algorithm, AlgorithmCatalog, AlgorithmId};
use crate::benchmark::BenchmarkStore;
use crate::device::{Device, DeviceId};
use crate::feeds::PriceMap;

/// Which devices mine which algorithm. A device appears under at most one algorithm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment {
    map: BTreeMap<AlgorithmId, Vec<DeviceId>>,
}

/// One miner instance: an algorithm and the devices it drives
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssignmentEntry {
    pub algorithm: AlgorithmId,
    pub devices: Vec<DeviceId>,
}

impl fmt::Display for AssignmentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let devices: Vec<String> = self.devices.iter().map(ToString::to_string).collect();
        write!(f, "{} [{}]", self.algorithm, devices.join(", "))
    }
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `device` to `algorithm`, moving it off any previous algorithm
    pub fn assign(&mut self, algorithm: AlgorithmId, device: DeviceId) {
        self.unassign(&device);
        let devices = self.map.entry(algorithm).or_default();
        if let Err(pos) = devices.binary_search(&device) {
            devices.insert(pos, device);
        }
    }

    pub fn unassign(&mut self, device: &DeviceId) {
        self.map.retain(|_, devices| {
            devices.retain(|d| d != device);
            !devices.is_empty()
        });
    }

    pub fn devices(&self, algorithm: &AlgorithmId) -> &[DeviceId] {
        self.map.get(algorithm).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn algorithm_for(&self, device: &DeviceId) -> Option<&AlgorithmId> {
        self.map
            .iter()
            .find(|(_, devices)| devices.contains(device))
            .map(|(alg, _)| alg)
    }

    /// Device to algorithm view
    pub fn device_map(&self) -> BTreeMap<DeviceId, AlgorithmId> {
        self.map
            .iter()
            .flat_map(|(alg, devices)| devices.iter().map(move |d| (*d, alg.clone())))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AlgorithmId, &[DeviceId])> {
        self.map.iter().map(|(alg, devices)| (alg, devices.as_slice()))
    }

    pub fn algorithms(&self) -> impl Iterator<Item = &AlgorithmId> {
        self.map.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of algorithms with at least one device
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Expand into miner instances. Multi-device algorithms get a single
    /// instance holding all their devices; others get one per device.
    pub fn instances(&self, catalog: &AlgorithmCatalog) -> Vec<AssignmentEntry> {
        let mut entries = Vec::new();
        for (alg, devices) in &self.map {
            let pooled = catalog.get(alg).map(|a| a.multi_device).unwrap_or(false);
            if pooled {
                entries.push(AssignmentEntry {
                    algorithm: alg.clone(),
                    devices: devices.clone(),
                });
            } else {
                entries.extend(devices.iter().map(|d| AssignmentEntry {
                    algorithm: alg.clone(),
                    devices: vec![*d],
                }));
            }
        }
        entries
    }
}

/// Revenue based algorithm selection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitabilityEngine {
    switching_threshold: f64,
}

impl Default for ProfitabilityEngine {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl ProfitabilityEngine {
    pub fn new(switching_threshold: f64) -> Self {
        Self {
            switching_threshold: switching_threshold.max(0.0),
        }
    }

    pub fn switching_threshold(&self) -> f64 {
        self.switching_threshold
    }

    /// Sum of speed times price over the algorithm's hash functions.
    ///
    /// `None` when a price is missing, the speed vector does not match the
    /// hash functions, or any value is not finite.
    pub fn revenue(&self, algorithm: &Algorithm, speeds: &[f64], prices: &PriceMap) -> Option<f64> {
        if speeds.len() != algorithm.hash_functions.len() {
            return None;
        }

        let mut total = 0.0;
        for (hash, speed) in algorithm.hash_functions.iter().zip(speeds) {
            let price = *prices.get(hash)?;
            if !speed.is_finite() || !price.is_finite() {
                return None;
            }
            total += speed * price;
        }

        total.is_finite().then_some(total)
    }

    /// Expected revenue of running `algorithm` on `device`
    fn option_revenue(
        &self,
        device: &Device,
        algorithm: &Algorithm,
        benchmarks: &BenchmarkStore,
        prices: &PriceMap,
    ) -> Option<f64> {
        if !device.supports(&algorithm.id) {
            return None;
        }
        let speeds = benchmarks.get(&device.id, &algorithm.id)?;
        self.revenue(algorithm, speeds, prices)
    }

    /// Every profitable option for a device, best first
    pub fn options(
        &self,
        device: &Device,
        catalog: &AlgorithmCatalog,
        benchmarks: &BenchmarkStore,
        prices: &PriceMap,
    ) -> Vec<(AlgorithmId, f64)> {
        let mut options: Vec<(AlgorithmId, f64)> = catalog
            .iter()
            .filter_map(|alg| {
                self.option_revenue(device, alg, benchmarks, prices)
                    .filter(|r| *r > 0.0)
                    .map(|r| (alg.id.clone(), r))
            })
            .collect();
        // Stable sort keeps id order among equal revenues
        options.sort_by(|a, b| b.1.total_cmp(&a.1));
        options
    }

    /// Most profitable option for a device. Ties go to the smallest id.
    fn best_option(
        &self,
        device: &Device,
        catalog: &AlgorithmCatalog,
        benchmarks: &BenchmarkStore,
        prices: &PriceMap,
    ) -> Option<(AlgorithmId, f64)> {
        let mut best: Option<(AlgorithmId, f64)> = None;
        // Catalog iterates in id order; only a strictly better option replaces
        for alg in catalog.iter() {
            let Some(revenue) = self.option_revenue(device, alg, benchmarks, prices) else {
                continue;
            };
            trace!("{} on {}: {}", alg.id, device.id, revenue);
            if revenue > 0.0 && best.as_ref().map_or(true, |(_, r)| revenue > *r) {
                best = Some((alg.id.clone(), revenue));
            }
        }
        best
    }

    /// Assign each device to its single most profitable algorithm
    pub fn optimize(
        &self,
        devices: &[Device],
        catalog: &AlgorithmCatalog,
        benchmarks: &BenchmarkStore,
        prices: &PriceMap,
    ) -> Assignment {
        let mut assignment = Assignment::new();
        for device in devices {
            match self.best_option(device, catalog, benchmarks, prices) {
                Some((alg, revenue)) => {
                    debug!("{} -> {} ({:.8})", device.id, alg, revenue);
                    assignment.assign(alg, device.id);
                }
                None => debug!("{} idle: no profitable algorithm", device.id),
            }
        }
        assignment
    }

    /// Like [`optimize`](Self::optimize), but a device stays on its current
    /// algorithm unless the best alternative beats it by more than the
    /// switching threshold.
    pub fn optimize_from(
        &self,
        current: &Assignment,
        devices: &[Device],
        catalog: &AlgorithmCatalog,
        benchmarks: &BenchmarkStore,
        prices: &PriceMap,
    ) -> Assignment {
        let mut assignment = Assignment::new();
        for device in devices {
            let Some((best, best_revenue)) = self.best_option(device, catalog, benchmarks, prices) else {
                debug!("{} idle: no profitable algorithm", device.id);
                continue;
            };

            let incumbent = current.algorithm_for(&device.id).and_then(|alg| {
                let algorithm = catalog.get(alg)?;
                let revenue = self
                    .option_revenue(device, algorithm, benchmarks, prices)
                    .filter(|r| *r > 0.0)?;
                Some((alg.clone(), revenue))
            });

            match incumbent {
                Some((alg, revenue))
                    if alg != best && best_revenue <= revenue * (1.0 + self.switching_threshold) =>
                {
                    debug!(
                        "{} stays on {} ({:.8}); {} ({:.8}) below switching threshold",
                        device.id, alg, revenue, best, best_revenue
                    );
                    assignment.assign(alg, device.id);
                }
                _ => assignment.assign(best, device.id),
            }
        }
        assignment
    }

    /// Total expected revenue of an assignment
    pub fn assignment_revenue(
        &self,
        assignment: &Assignment,
        devices: &[Device],
        catalog: &AlgorithmCatalog,
        benchmarks: &BenchmarkStore,
        prices: &PriceMap,
    ) -> f64 {
        devices
            .iter()
            .filter_map(|device| {
                let alg = catalog.get(assignment.algorithm_for(&device.id)?)?;
                self.option_revenue(device, alg, benchmarks, prices)
            })
            .sum()
    }
}
