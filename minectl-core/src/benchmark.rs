use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::algorithm::AlgorithmId;
use crate::device::DeviceId;
use crate::error::BenchmarkError;

/// Measured speeds per (device, algorithm), one value per hash function.
///
/// Written by whoever runs benchmarks; the orchestrator only reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BenchmarkStore {
    speeds: BTreeMap<DeviceId, BTreeMap<AlgorithmId, Vec<f64>>>,
}

/// Benchmark store shared between the orchestrator and a benchmark writer
pub type SharedBenchmarks = Arc<RwLock<BenchmarkStore>>;

impl BenchmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedBenchmarks {
        Arc::new(RwLock::new(self))
    }

    pub fn get(&self, device: &DeviceId, algorithm: &AlgorithmId) -> Option<&[f64]> {
        self.speeds
            .get(device)
            .and_then(|m| m.get(algorithm))
            .map(Vec::as_slice)
    }

    pub fn set(&mut self, device: DeviceId, algorithm: AlgorithmId, speeds: Vec<f64>) {
        self.speeds.entry(device).or_default().insert(algorithm, speeds);
    }

    pub fn remove(&mut self, device: &DeviceId, algorithm: &AlgorithmId) -> Option<Vec<f64>> {
        let per_device = self.speeds.get_mut(device)?;
        let removed = per_device.remove(algorithm);
        if per_device.is_empty() {
            self.speeds.remove(device);
        }
        removed
    }

    /// All entries ordered by device then algorithm
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &AlgorithmId, &[f64])> {
        self.speeds.iter().flat_map(|(device, per_alg)| {
            per_alg
                .iter()
                .map(move |(alg, speeds)| (device, alg, speeds.as_slice()))
        })
    }

    pub fn len(&self) -> usize {
        self.speeds.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.speeds.is_empty()
    }

    /// Load from a JSON file. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, BenchmarkError> {
        if !path.exists() {
            debug!("No benchmark file at {}", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&contents)?;
        info!("Loaded {} benchmark(s) from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<(), BenchmarkError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!("Saved {} benchmark(s) to {}", self.len(), path.display());
        Ok(())
    }
}
