use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use backoff::ExponentialBackoffBuilder;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::algorithm::Algorithm;
use crate::backend::{BackendHandle, BackendKind, BackendStatus, BackendTelemetry, LaunchConfig, MinerBackend};
use crate::config::SupervisorConfig;
use crate::device::{Device, DeviceId};
use crate::error::{BackendError, CrashError, StartupError};
use crate::feeds::PriceMap;
use crate::profit::{AssignmentEntry, ProfitabilityEngine};

/// Lifecycle of a miner instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    /// Recent polls failed but the process is not yet given up on
    Degraded,
    Crashed,
    Stopping,
    Stopped,
}

/// Result of a health poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Running,
    Degraded,
    Crashed,
}

/// Latest telemetry of one miner instance
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub device_speeds: BTreeMap<DeviceId, Vec<f64>>,
    pub device_revenue: BTreeMap<DeviceId, f64>,
    pub received_at: Instant,
}

impl Telemetry {
    pub fn total_revenue(&self) -> f64 {
        self.device_revenue.values().sum()
    }
}

/// One running backend instance
pub struct MinerProcess {
    entry: AssignmentEntry,
    algorithm: Algorithm,
    handle: BackendHandle,
    backend: Arc<dyn MinerBackend>,
    state: ProcessState,
    missed_polls: u32,
    last_telemetry: Option<Telemetry>,
    started_at: Instant,
}

impl MinerProcess {
    pub fn entry(&self) -> &AssignmentEntry {
        &self.entry
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.entry.devices
    }

    pub fn handle(&self) -> BackendHandle {
        self.handle
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn missed_polls(&self) -> u32 {
        self.missed_polls
    }

    pub fn last_telemetry(&self) -> Option<&Telemetry> {
        self.last_telemetry.as_ref()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    fn crash(&mut self, reason: String) -> CrashError {
        self.state = ProcessState::Crashed;
        self.last_telemetry = None;
        CrashError {
            algorithm: self.entry.algorithm.clone(),
            devices: self.entry.devices.clone(),
            reason,
        }
    }
}

/// Outcome of a health poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub health: HealthState,
    /// Latest known telemetry, absent once crashed
    pub telemetry: Option<Telemetry>,
    pub crash: Option<CrashError>,
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Graceful,
    Forced,
    AlreadyStopped,
}

enum ReadyError {
    NotReady,
    Exited(Option<i32>),
    Backend(BackendError),
}

/// Starts, polls and stops miner backend instances
pub struct MinerSupervisor {
    config: SupervisorConfig,
    engine: ProfitabilityEngine,
    backends: HashMap<BackendKind, Arc<dyn MinerBackend>>,
}

impl MinerSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            engine: ProfitabilityEngine::default(),
            backends: HashMap::new(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn MinerBackend>) -> Self {
        self.register_backend(backend);
        self
    }

    pub fn register_backend(&mut self, backend: Arc<dyn MinerBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch an instance and wait until it reports Running.
    ///
    /// On timeout, early exit or cancellation the instance is force-killed.
    pub async fn start(
        &self,
        entry: AssignmentEntry,
        algorithm: &Algorithm,
        devices: &[Device],
        launch: &LaunchConfig,
        cancel: &CancellationToken,
    ) -> Result<MinerProcess, StartupError> {
        let backend = self
            .backends
            .get(&algorithm.backend)
            .cloned()
            .ok_or(StartupError::NoBackend(algorithm.backend))?;

        if cancel.is_cancelled() {
            return Err(StartupError::Cancelled(entry.algorithm));
        }

        info!("Starting {}", entry);
        let handle = backend
            .launch(algorithm, devices, launch)
            .await
            .map_err(|source| StartupError::Launch {
                algorithm: entry.algorithm.clone(),
                source,
            })?;

        let mut process = MinerProcess {
            entry,
            algorithm: algorithm.clone(),
            handle,
            backend: Arc::clone(&backend),
            state: ProcessState::Starting,
            missed_polls: 0,
            last_telemetry: None,
            started_at: Instant::now(),
        };

        let startup_timeout = self.config.startup_timeout();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(StartupError::Cancelled(process.entry.algorithm.clone())),
            ready = timeout(startup_timeout, self.wait_ready(backend.as_ref(), &handle)) => match ready {
                Ok(Ok(())) => Ok(()),
                Ok(Err(code)) => Err(StartupError::Exited {
                    algorithm: process.entry.algorithm.clone(),
                    code,
                }),
                Err(_) => Err(StartupError::Timeout {
                    algorithm: process.entry.algorithm.clone(),
                    timeout: startup_timeout,
                }),
            },
        };

        match outcome {
            Ok(()) => {
                process.state = ProcessState::Running;
                info!(
                    "{} running after {:?}",
                    process.entry,
                    process.started_at.elapsed()
                );
                Ok(process)
            }
            Err(e) => {
                warn!("Startup of {} failed: {}", process.entry, e);
                if let Err(kill_err) = backend.kill(&handle).await {
                    error!("Failed to kill {}: {}", process.entry, kill_err);
                }
                Err(e)
            }
        }
    }

    /// Poll status with exponential backoff until Running. Errs with the
    /// exit code if the process exits first.
    async fn wait_ready(&self, backend: &dyn MinerBackend, handle: &BackendHandle) -> Result<(), Option<i32>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.ready_backoff_initial())
            .with_max_interval(self.config.ready_backoff_max())
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let result = backoff::future::retry(policy, || async move {
            match backend.status(handle).await {
                Ok(BackendStatus::Running(_)) => Ok(()),
                Ok(BackendStatus::Starting) => Err(backoff::Error::transient(ReadyError::NotReady)),
                Ok(BackendStatus::Exited(code)) => Err(backoff::Error::permanent(ReadyError::Exited(code))),
                Err(e) => Err(backoff::Error::transient(ReadyError::Backend(e))),
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(ReadyError::Exited(code)) => Err(code),
            // Unreachable without an elapsed-time limit
            Err(ReadyError::NotReady) | Err(ReadyError::Backend(_)) => Err(None),
        }
    }

    /// Terminate gracefully, force-killing after the shutdown timeout.
    /// Never fails; stopping a stopped process does nothing.
    pub async fn stop(&self, process: &mut MinerProcess) -> StopOutcome {
        if process.state == ProcessState::Stopped {
            return StopOutcome::AlreadyStopped;
        }

        process.state = ProcessState::Stopping;
        let backend = Arc::clone(&process.backend);
        let handle = process.handle;
        debug!("Stopping {}", process.entry);

        let graceful = match backend.terminate(&handle).await {
            Ok(()) => timeout(self.config.shutdown_timeout(), self.wait_exit(backend.as_ref(), &handle))
                .await
                .is_ok(),
            Err(e) => {
                warn!("Terminate request for {} failed: {}", process.entry, e);
                false
            }
        };

        let outcome = if graceful {
            StopOutcome::Graceful
        } else {
            warn!(
                "{} did not exit within {:?}, killing",
                process.entry,
                self.config.shutdown_timeout()
            );
            if let Err(e) = backend.kill(&handle).await {
                error!("Failed to kill {}: {}", process.entry, e);
            }
            StopOutcome::Forced
        };

        process.state = ProcessState::Stopped;
        process.last_telemetry = None;
        info!("Stopped {}", process.entry);
        outcome
    }

    async fn wait_exit(&self, backend: &dyn MinerBackend, handle: &BackendHandle) {
        loop {
            if let Ok(BackendStatus::Exited(_)) = backend.status(handle).await {
                return;
            }
            tokio::time::sleep(self.config.ready_backoff_initial()).await;
        }
    }

    /// Check health and collect telemetry. Revenue is estimated from
    /// `prices` when the backend does not report it.
    pub async fn poll(&self, process: &mut MinerProcess, prices: Option<&PriceMap>) -> PollReport {
        match process.state {
            ProcessState::Crashed | ProcessState::Stopping | ProcessState::Stopped => {
                return PollReport {
                    health: HealthState::Crashed,
                    telemetry: None,
                    crash: None,
                };
            }
            _ => {}
        }

        let status = timeout(self.config.poll_timeout(), process.backend.status(&process.handle)).await;

        let missed = match status {
            Ok(Ok(BackendStatus::Running(telemetry))) => {
                let telemetry = self.telemetry(&process.algorithm, telemetry, prices);
                if process.state == ProcessState::Degraded {
                    info!("{} recovered", process.entry);
                }
                process.state = ProcessState::Running;
                process.missed_polls = 0;
                process.last_telemetry = Some(telemetry);
                return PollReport {
                    health: HealthState::Running,
                    telemetry: process.last_telemetry.clone(),
                    crash: None,
                };
            }
            Ok(Ok(BackendStatus::Exited(code))) => {
                let crash = process.crash(format!("process exited (code {:?})", code));
                error!("{}", crash);
                return PollReport {
                    health: HealthState::Crashed,
                    telemetry: None,
                    crash: Some(crash),
                };
            }
            Ok(Ok(BackendStatus::Starting)) => "backend not ready".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no answer within {:?}", self.config.poll_timeout()),
        };

        process.missed_polls += 1;
        warn!(
            "Missed poll {}/{} for {}: {}",
            process.missed_polls, self.config.max_missed_polls, process.entry, missed
        );

        if process.missed_polls >= self.config.max_missed_polls {
            let crash = process.crash(format!("{} consecutive missed polls: {}", process.missed_polls, missed));
            error!("{}", crash);
            PollReport {
                health: HealthState::Crashed,
                telemetry: None,
                crash: Some(crash),
            }
        } else {
            process.state = ProcessState::Degraded;
            PollReport {
                health: HealthState::Degraded,
                telemetry: process.last_telemetry.clone(),
                crash: None,
            }
        }
    }

    fn telemetry(&self, algorithm: &Algorithm, raw: BackendTelemetry, prices: Option<&PriceMap>) -> Telemetry {
        let device_revenue = match raw.revenue {
            Some(revenue) => revenue,
            None => raw
                .device_speeds
                .iter()
                .map(|(device, speeds)| {
                    let revenue = prices
                        .and_then(|p| self.engine.revenue(algorithm, speeds, p))
                        .unwrap_or(0.0);
                    (*device, revenue)
                })
                .collect(),
        };

        Telemetry {
            device_speeds: raw.device_speeds,
            device_revenue,
            received_at: Instant::now(),
        }
    }
}
