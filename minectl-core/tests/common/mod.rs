#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use minectl_core::{
    Algorithm, AlgorithmCatalog, AlgorithmId, BackendError, BackendHandle, BackendKind, BackendStatus,
    BackendTelemetry, BenchmarkStore, Device, DeviceId, LaunchConfig, MinerBackend, MinerSupervisor,
    OrchestrationController, OrchestratorConfig, PriceMap, SharedBenchmarks, StaticBalanceFeed,
    StaticDeviceRegistry, StaticPriceFeed, SupervisorConfig,
};
use parking_lot::Mutex;

/// How fake instances of an algorithm behave
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Polls until Running; `None` never becomes ready
    pub ready_after: Option<u32>,
    /// Delay inside `launch`
    pub launch_delay: Duration,
    /// Keep running after a terminate request
    pub ignore_terminate: bool,
    /// Exit right after launch
    pub exit_on_start: bool,
    /// Speed reported for every hash function
    pub speed: f64,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            ready_after: Some(1),
            launch_delay: Duration::ZERO,
            ignore_terminate: false,
            exit_on_start: false,
            speed: 50.0,
        }
    }
}

#[derive(Debug)]
struct FakeInstance {
    algorithm: AlgorithmId,
    hash_count: usize,
    devices: Vec<DeviceId>,
    behavior: Behavior,
    polls: u32,
    exited: bool,
    hang: bool,
}

/// In-memory miner backend recording every call
#[derive(Default)]
pub struct FakeBackend {
    behaviors: Mutex<HashMap<AlgorithmId, Behavior>>,
    instances: Mutex<HashMap<u64, FakeInstance>>,
    next_id: AtomicU64,
    log: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_behavior(&self, algorithm: &str, behavior: Behavior) {
        self.behaviors.lock().insert(AlgorithmId::from(algorithm), behavior);
    }

    /// Make every live instance of `algorithm` exit
    pub fn crash(&self, algorithm: &str) {
        for instance in self.instances.lock().values_mut() {
            if instance.algorithm.as_str() == algorithm {
                instance.exited = true;
            }
        }
    }

    /// Make status calls for `algorithm` hang
    pub fn hang(&self, algorithm: &str, hang: bool) {
        for instance in self.instances.lock().values_mut() {
            if instance.algorithm.as_str() == algorithm {
                instance.hang = hang;
            }
        }
    }

    /// Instances launched and not yet exited or killed
    pub fn live(&self) -> usize {
        self.instances.lock().values().filter(|i| !i.exited).count()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.log.lock().iter().filter(|l| l.starts_with(op)).count()
    }

    fn record(&self, entry: String) {
        self.log.lock().push(entry);
    }
}

#[async_trait]
impl MinerBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Excavator
    }

    async fn launch(
        &self,
        algorithm: &Algorithm,
        devices: &[Device],
        _config: &LaunchConfig,
    ) -> Result<BackendHandle, BackendError> {
        let behavior = self
            .behaviors
            .lock()
            .get(&algorithm.id)
            .cloned()
            .unwrap_or_default();

        if !behavior.launch_delay.is_zero() {
            tokio::time::sleep(behavior.launch_delay).await;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let device_ids: Vec<DeviceId> = devices.iter().map(|d| d.id).collect();
        let names: Vec<String> = device_ids.iter().map(ToString::to_string).collect();
        self.record(format!("launch {} {}", algorithm.id, names.join(",")));

        self.instances.lock().insert(
            id,
            FakeInstance {
                algorithm: algorithm.id.clone(),
                hash_count: algorithm.hash_functions.len(),
                devices: device_ids,
                exited: behavior.exit_on_start,
                behavior,
                polls: 0,
                hang: false,
            },
        );

        Ok(BackendHandle { id, pid: Some(10_000 + id as u32) })
    }

    async fn status(&self, handle: &BackendHandle) -> Result<BackendStatus, BackendError> {
        let hang = match self.instances.lock().get(&handle.id) {
            Some(instance) => instance.hang && !instance.exited,
            None => return Ok(BackendStatus::Exited(None)),
        };
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let mut instances = self.instances.lock();
        let Some(instance) = instances.get_mut(&handle.id) else {
            return Ok(BackendStatus::Exited(None));
        };
        if instance.exited {
            return Ok(BackendStatus::Exited(Some(1)));
        }

        instance.polls += 1;
        match instance.behavior.ready_after {
            Some(n) if instance.polls >= n => {
                let device_speeds: BTreeMap<DeviceId, Vec<f64>> = instance
                    .devices
                    .iter()
                    .map(|d| (*d, vec![instance.behavior.speed; instance.hash_count]))
                    .collect();
                Ok(BackendStatus::Running(BackendTelemetry {
                    device_speeds,
                    revenue: None,
                }))
            }
            _ => Ok(BackendStatus::Starting),
        }
    }

    async fn terminate(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        self.record(format!("terminate {}", handle.id));
        if let Some(instance) = self.instances.lock().get_mut(&handle.id) {
            if !instance.behavior.ignore_terminate {
                instance.exited = true;
            }
        }
        Ok(())
    }

    async fn kill(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        self.record(format!("kill {}", handle.id));
        self.instances.lock().remove(&handle.id);
        Ok(())
    }
}

pub fn algorithm(id: &str, multi_device: bool) -> Algorithm {
    Algorithm {
        id: AlgorithmId::from(id),
        display_name: id.to_uppercase(),
        hash_functions: vec![id.to_string()],
        backend: BackendKind::Excavator,
        multi_device,
        min_memory_mb: 0,
    }
}

/// x and y are single-device, z is poolable
pub fn catalog() -> AlgorithmCatalog {
    AlgorithmCatalog::new(vec![algorithm("x", false), algorithm("y", false), algorithm("z", true)])
}

pub fn device(index: u32, caps: &[&str]) -> Device {
    Device {
        id: DeviceId::nvidia(index),
        name: format!("GeForce GTX 10{}0", index + 6),
        uuid: None,
        memory_mb: 8192,
        capabilities: caps.iter().map(|c| AlgorithmId::from(*c)).collect::<BTreeSet<_>>(),
    }
}

pub fn prices(entries: &[(&str, f64)]) -> PriceMap {
    entries.iter().map(|(h, p)| (h.to_string(), *p)).collect()
}

pub fn supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        startup_timeout_ms: 300,
        shutdown_timeout_ms: 100,
        poll_timeout_ms: 50,
        ready_backoff_initial_ms: 5,
        ready_backoff_max_ms: 20,
        max_missed_polls: 2,
    }
}

pub struct Harness {
    pub controller: Arc<OrchestrationController>,
    pub backend: Arc<FakeBackend>,
    pub prices: Arc<StaticPriceFeed>,
    pub balance: Arc<StaticBalanceFeed>,
    pub benchmarks: SharedBenchmarks,
}

/// Controller over `devices`, each benchmarked at `speeds` per algorithm
pub fn harness(devices: Vec<Device>, speeds: &[(&str, f64)], price_map: PriceMap) -> Harness {
    harness_with(devices, speeds, price_map, supervisor_config())
}

pub fn harness_with(
    devices: Vec<Device>,
    speeds: &[(&str, f64)],
    price_map: PriceMap,
    config: SupervisorConfig,
) -> Harness {
    let mut store = BenchmarkStore::new();
    for d in &devices {
        for (alg, speed) in speeds {
            store.set(d.id, AlgorithmId::from(*alg), vec![*speed]);
        }
    }
    let benchmarks = store.into_shared();

    let backend = FakeBackend::new();
    let prices = Arc::new(StaticPriceFeed::new(price_map));
    let balance = Arc::new(StaticBalanceFeed::new(Some(0.001)));
    let supervisor = MinerSupervisor::new(config.clone()).with_backend(backend.clone());

    let controller = OrchestrationController::new(
        OrchestratorConfig {
            supervisor: config,
            tick_interval_ms: 20,
            reoptimize_interval_secs: 3600,
        },
        catalog(),
        Arc::new(StaticDeviceRegistry::new(devices)),
        benchmarks.clone(),
        prices.clone(),
        balance.clone(),
        supervisor,
    );

    Harness {
        controller: Arc::new(controller),
        backend,
        prices,
        balance,
        benchmarks,
    }
}
