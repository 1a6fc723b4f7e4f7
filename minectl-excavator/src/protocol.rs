use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{ExcavatorError, Result};

/// Excavator API request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcavatorRequest {
    pub id: u64,
    pub method: String,
    pub params: Vec<String>,
}

/// Excavator API response.
///
/// Excavator puts result fields next to `id` and `error` rather than under
/// a `result` key, so everything else lands in `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcavatorResponse {
    pub id: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// One algorithm slot of a worker as reported by `worker.list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmSpeed {
    pub name: String,
    #[serde(default)]
    pub speed: f64,
}

/// Worker entry of `worker.list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: u32,
    pub device_id: u32,
    #[serde(default)]
    pub algorithms: Vec<AlgorithmSpeed>,
}

impl WorkerStatus {
    /// Speeds in the order the algorithms are reported
    pub fn speeds(&self) -> Vec<f64> {
        self.algorithms.iter().map(|a| a.speed).collect()
    }
}

/// Excavator API methods
pub mod methods {
    pub const SUBSCRIBE: &str = "subscribe";
    pub const ALGORITHM_ADD: &str = "algorithm.add";
    pub const ALGORITHM_REMOVE: &str = "algorithm.remove";
    pub const WORKER_ADD: &str = "worker.add";
    pub const WORKER_FREE: &str = "worker.free";
    pub const WORKER_LIST: &str = "worker.list";
    pub const INFO: &str = "info";
    pub const QUIT: &str = "quit";
}

impl ExcavatorRequest {
    pub fn new(id: u64, method: &str, params: Vec<String>) -> Self {
        Self {
            id,
            method: method.to_string(),
            params,
        }
    }

    /// Connect excavator to a stratum server
    pub fn subscribe(id: u64, stratum_url: &str, username: &str) -> Self {
        Self::new(id, methods::SUBSCRIBE, vec![stratum_url.to_string(), username.to_string()])
    }

    /// Register an algorithm, e.g. "daggerhashimoto_pascal"
    pub fn algorithm_add(id: u64, algorithm: &str) -> Self {
        Self::new(id, methods::ALGORITHM_ADD, vec![algorithm.to_string()])
    }

    pub fn algorithm_remove(id: u64, algorithm: &str) -> Self {
        Self::new(id, methods::ALGORITHM_REMOVE, vec![algorithm.to_string()])
    }

    /// Start a worker for `algorithm` on device `device_id`
    pub fn worker_add(id: u64, algorithm: &str, device_id: u32) -> Self {
        Self::new(id, methods::WORKER_ADD, vec![algorithm.to_string(), device_id.to_string()])
    }

    pub fn worker_free(id: u64, worker_id: u32) -> Self {
        Self::new(id, methods::WORKER_FREE, vec![worker_id.to_string()])
    }

    pub fn worker_list(id: u64) -> Self {
        Self::new(id, methods::WORKER_LIST, Vec::new())
    }

    pub fn info(id: u64) -> Self {
        Self::new(id, methods::INFO, Vec::new())
    }

    pub fn quit(id: u64) -> Self {
        Self::new(id, methods::QUIT, Vec::new())
    }
}

impl ExcavatorResponse {
    /// Turn an API level error into `ExcavatorError::Api`
    pub fn into_body(self, method: &str) -> Result<Map<String, Value>> {
        match self.error {
            Some(message) => Err(ExcavatorError::Api {
                method: method.to_string(),
                message,
            }),
            None => Ok(self.body),
        }
    }
}

/// Parse the body of a `worker.add` response
pub fn parse_worker_id(body: &Map<String, Value>) -> Result<u32> {
    body.get("worker_id")
        .and_then(Value::as_u64)
        .map(|id| id as u32)
        .ok_or_else(|| ExcavatorError::Protocol("worker.add response without worker_id".to_string()))
}

/// Parse the body of a `worker.list` response
pub fn parse_worker_list(body: Map<String, Value>) -> Result<Vec<WorkerStatus>> {
    let workers = body
        .get("workers")
        .cloned()
        .ok_or_else(|| ExcavatorError::Protocol("worker.list response without workers".to_string()))?;
    Ok(serde_json::from_value(workers)?)
}

impl fmt::Display for ExcavatorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.method, self.params.join(", "))
    }
}
