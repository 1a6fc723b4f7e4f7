use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use minectl_excavator::{ExcavatorClient, ExcavatorConfig, ExcavatorProcess};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{BackendHandle, BackendKind, BackendStatus, BackendTelemetry, LaunchConfig, MinerBackend};
use crate::algorithm::Algorithm;
use crate::device::{Device, DeviceId};
use crate::error::BackendError;

struct Instance {
    process: ExcavatorProcess,
    client: ExcavatorClient,
    /// Excavator algorithm name, e.g. "daggerhashimoto_pascal"
    algorithm: String,
    devices: Vec<DeviceId>,
    launch: LaunchConfig,
    configured: bool,
}

impl Instance {
    /// Subscribe, add the algorithm and one worker per device
    async fn configure(&mut self) -> Result<(), BackendError> {
        self.client
            .subscribe(&self.launch.stratum_url, &self.launch.username)
            .await?;
        self.client.algorithm_add(&self.algorithm).await?;
        for device in &self.devices {
            self.client.worker_add(&self.algorithm, device.index).await?;
        }
        self.configured = true;
        info!("Excavator on port {} mining {}", self.process.port(), self.algorithm);
        Ok(())
    }

    async fn telemetry(&self) -> Result<BackendTelemetry, BackendError> {
        let workers = self.client.worker_list().await?;
        let mut device_speeds = BTreeMap::new();
        for worker in workers {
            match self.devices.iter().find(|d| d.index == worker.device_id) {
                Some(device) => {
                    device_speeds.insert(*device, worker.speeds());
                }
                None => debug!("Ignoring worker on unmanaged device {}", worker.device_id),
            }
        }
        Ok(BackendTelemetry {
            device_speeds,
            revenue: None,
        })
    }
}

/// Runs each miner instance as its own excavator process
pub struct ExcavatorBackend {
    config: ExcavatorConfig,
    instances: DashMap<u64, Arc<Mutex<Instance>>>,
    next_id: AtomicU64,
}

impl ExcavatorBackend {
    pub fn new(config: ExcavatorConfig) -> Self {
        Self {
            config,
            instances: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    fn instance(&self, handle: &BackendHandle) -> Option<Arc<Mutex<Instance>>> {
        self.instances.get(&handle.id).map(|i| Arc::clone(i.value()))
    }
}

#[async_trait]
impl MinerBackend for ExcavatorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Excavator
    }

    async fn launch(
        &self,
        algorithm: &Algorithm,
        devices: &[Device],
        config: &LaunchConfig,
    ) -> Result<BackendHandle, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let port = self.config.port_for(id);
        let process = ExcavatorProcess::spawn(&self.config, port)?;
        let handle = BackendHandle { id, pid: process.pid() };

        let instance = Instance {
            process,
            client: ExcavatorClient::new(&self.config, port),
            algorithm: algorithm.backend_name(),
            devices: devices.iter().map(|d| d.id).collect(),
            launch: config.clone(),
            configured: false,
        };
        self.instances.insert(id, Arc::new(Mutex::new(instance)));

        Ok(handle)
    }

    async fn status(&self, handle: &BackendHandle) -> Result<BackendStatus, BackendError> {
        let Some(instance) = self.instance(handle) else {
            return Ok(BackendStatus::Exited(None));
        };
        let mut instance = instance.lock().await;

        if let Some(exit) = instance.process.try_exit_status()? {
            drop(instance);
            self.instances.remove(&handle.id);
            return Ok(BackendStatus::Exited(exit.code()));
        }

        if !instance.client.is_connected().await {
            if let Err(e) = instance.client.connect().await {
                debug!("Excavator API not up yet: {}", e);
                return Ok(BackendStatus::Starting);
            }
        }

        if !instance.configured {
            if let Err(e) = instance.configure().await {
                // Reconnect and reconfigure from scratch next time
                instance.client.disconnect().await;
                return Err(e);
            }
        }

        Ok(BackendStatus::Running(instance.telemetry().await?))
    }

    async fn terminate(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let Some(instance) = self.instance(handle) else {
            return Ok(());
        };
        let mut instance = instance.lock().await;

        if instance.client.is_connected().await {
            if let Err(e) = instance.client.quit().await {
                warn!("Excavator quit request failed: {}", e);
            }
            instance.client.disconnect().await;
        } else {
            // API never came up, nothing to ask politely
            instance.process.kill().await?;
        }
        Ok(())
    }

    async fn kill(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let Some((_, instance)) = self.instances.remove(&handle.id) else {
            return Ok(());
        };
        let mut instance = instance.lock().await;
        instance.client.disconnect().await;
        instance.process.kill().await?;
        Ok(())
    }
}
