use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Algorithm identifier, e.g. `excavator_daggerhashimoto_pascal`.
///
/// Ordering is lexicographic and is used for tie breaking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlgorithmId(String);

impl AlgorithmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AlgorithmId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A mineable algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Algorithm {
    pub id: AlgorithmId,

    /// Human readable name
    pub display_name: String,

    /// Underlying hash functions, in the order speeds are reported
    pub hash_functions: Vec<String>,

    /// Miner backend that runs this algorithm
    pub backend: BackendKind,

    /// Whether one miner instance can drive several devices
    pub multi_device: bool,

    /// Minimum device memory in MiB
    #[serde(default)]
    pub min_memory_mb: u64,
}

impl Algorithm {
    /// Algorithm mining more than one hash function at once
    pub fn is_dual(&self) -> bool {
        self.hash_functions.len() > 1
    }

    /// Name the backend knows this algorithm by
    pub fn backend_name(&self) -> String {
        self.hash_functions.join("_")
    }

    fn excavator(hash_functions: &[&str], display_name: &str, min_memory_mb: u64) -> Self {
        let hash_functions: Vec<String> = hash_functions.iter().map(|h| h.to_string()).collect();
        Self {
            id: AlgorithmId::new(format!("excavator_{}", hash_functions.join("_"))),
            display_name: display_name.to_string(),
            hash_functions,
            backend: BackendKind::Excavator,
            multi_device: true,
            min_memory_mb,
        }
    }
}

/// Static table of known algorithms keyed by id
#[derive(Debug, Clone, Default)]
pub struct AlgorithmCatalog {
    algorithms: BTreeMap<AlgorithmId, Algorithm>,
}

impl AlgorithmCatalog {
    pub fn new(algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        Self {
            algorithms: algorithms.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    /// Built-in catalog of the algorithms excavator can run
    pub fn excavator() -> Self {
        Self::new(vec![
            Algorithm::excavator(&["equihash"], "Equihash", 1024),
            Algorithm::excavator(&["pascal"], "Pascal", 0),
            Algorithm::excavator(&["decred"], "Decred", 0),
            Algorithm::excavator(&["sia"], "Sia", 0),
            Algorithm::excavator(&["lbry"], "LBRY", 0),
            Algorithm::excavator(&["blake2s"], "Blake2s", 0),
            Algorithm::excavator(&["daggerhashimoto"], "Ethash", 3072),
            Algorithm::excavator(&["lyra2rev2"], "Lyra2REv2", 0),
            Algorithm::excavator(&["neoscrypt"], "NeoScrypt", 0),
            Algorithm::excavator(&["keccak"], "Keccak", 0),
            Algorithm::excavator(&["nist5"], "NIST5", 0),
            Algorithm::excavator(&["cryptonightV7"], "CryptoNight v7", 2048),
            Algorithm::excavator(&["daggerhashimoto", "pascal"], "Ethash + Pascal", 3072),
            Algorithm::excavator(&["daggerhashimoto", "decred"], "Ethash + Decred", 3072),
            Algorithm::excavator(&["daggerhashimoto", "sia"], "Ethash + Sia", 3072),
        ])
    }

    pub fn get(&self, id: &AlgorithmId) -> Option<&Algorithm> {
        self.algorithms.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Algorithm> {
        self.algorithms.values()
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }

    /// Catalog with the given algorithms removed
    pub fn without(&self, disabled: &BTreeSet<AlgorithmId>) -> Self {
        Self {
            algorithms: self
                .algorithms
                .iter()
                .filter(|(id, _)| !disabled.contains(*id))
                .map(|(id, a)| (id.clone(), a.clone()))
                .collect(),
        }
    }
}
