use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::algorithm::AlgorithmCatalog;
use crate::backend::LaunchConfig;
use crate::benchmark::SharedBenchmarks;
use crate::config::OrchestratorConfig;
use crate::device::{Device, DeviceRegistry};
use crate::error::{CrashError, SessionError, StartupError};
use crate::feeds::{BalanceFeed, PriceFeed, PriceMap};
use crate::profit::{Assignment, AssignmentEntry, ProfitabilityEngine};
use crate::settings::Settings;
use crate::status::{StatusAggregator, StatusSnapshot};
use crate::supervisor::{MinerProcess, MinerSupervisor};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Mining,
    Reoptimizing,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Mining => "mining",
            SessionState::Reoptimizing => "reoptimizing",
            SessionState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Events broadcast to observers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    StartFailed(String),
    ProcessCrashed(CrashError),
    Restarted(AssignmentEntry),
    Reassigned {
        stopped: Vec<AssignmentEntry>,
        started: Vec<AssignmentEntry>,
        failed: Vec<AssignmentEntry>,
    },
}

/// What a reoptimize request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReoptimizeOutcome {
    Applied {
        stopped: usize,
        started: usize,
        failed: usize,
    },
    /// New assignment equals the running one
    Unchanged,
    /// Another reoptimization was in flight and will run once more
    Coalesced,
    /// No price data
    Skipped,
}

impl ReoptimizeOutcome {
    /// Combine the outcomes of consecutive cycles of one request
    fn merge(self, next: ReoptimizeOutcome) -> ReoptimizeOutcome {
        match (self, next) {
            (
                ReoptimizeOutcome::Applied { stopped, started, failed },
                ReoptimizeOutcome::Applied {
                    stopped: s,
                    started: t,
                    failed: f,
                },
            ) => ReoptimizeOutcome::Applied {
                stopped: stopped + s,
                started: started + t,
                failed: failed + f,
            },
            (applied @ ReoptimizeOutcome::Applied { .. }, _) => applied,
            (_, applied @ ReoptimizeOutcome::Applied { .. }) => applied,
            (first, _) => first,
        }
    }
}

#[derive(Debug, Default)]
struct ReoptimizeGate {
    running: bool,
    rerun: bool,
}

/// Holds the reoptimize gate; releases it on drop unless already released
struct GateGuard<'a> {
    gate: &'a SyncMutex<ReoptimizeGate>,
    held: bool,
}

impl<'a> GateGuard<'a> {
    /// `None` when another request holds the gate; it is then asked to rerun
    fn enter(gate: &'a SyncMutex<ReoptimizeGate>) -> Option<Self> {
        let mut state = gate.lock();
        if state.running {
            state.rerun = true;
            return None;
        }
        state.running = true;
        state.rerun = false;
        Some(Self { gate, held: true })
    }

    /// Consume a pending rerun request, or release the gate if there is none
    fn rerun_requested(&mut self) -> bool {
        let mut state = self.gate.lock();
        if state.rerun {
            state.rerun = false;
            return true;
        }
        state.running = false;
        self.held = false;
        false
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            let mut state = self.gate.lock();
            state.running = false;
            state.rerun = false;
        }
    }
}

/// Result of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub polled: usize,
    pub crashed: usize,
    pub restarted: usize,
}

/// Cumulative controller counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub optimize_cycles: u64,
    pub coalesced: u64,
    pub restarts: u64,
}

/// A running session
struct ActiveSession {
    settings: Settings,
    /// Devices enumerated at session start
    enumerated: Vec<Device>,
    /// Enumerated devices minus disabled ones
    devices: Vec<Device>,
    catalog: AlgorithmCatalog,
    engine: ProfitabilityEngine,
    launch: LaunchConfig,
    assignment: Assignment,
    processes: Vec<MinerProcess>,
}

impl ActiveSession {
    fn new(settings: Settings, enumerated: Vec<Device>, base: &AlgorithmCatalog) -> Self {
        let mut session = Self {
            settings: Settings::default(),
            enumerated,
            devices: Vec::new(),
            catalog: AlgorithmCatalog::default(),
            engine: ProfitabilityEngine::default(),
            launch: LaunchConfig::default(),
            assignment: Assignment::new(),
            processes: Vec::new(),
        };
        session.apply_settings(settings, base);
        session
    }

    fn apply_settings(&mut self, settings: Settings, base: &AlgorithmCatalog) {
        self.devices = self
            .enumerated
            .iter()
            .filter(|d| !settings.disabled_devices.contains(&d.id))
            .cloned()
            .collect();
        self.catalog = base.without(&settings.disabled_algorithms);
        self.engine = ProfitabilityEngine::new(settings.switching_threshold);
        self.launch = LaunchConfig {
            stratum_url: settings.pool.stratum_url(),
            username: settings.pool.username(),
        };
        self.settings = settings;
    }

    fn running_entries(&self) -> BTreeSet<AssignmentEntry> {
        self.processes.iter().map(|p| p.entry().clone()).collect()
    }
}

/// Top level mining session coordinator.
///
/// `start`, `stop`, `reoptimize` and `tick` serialize on one session lock.
/// A reoptimize request arriving while another is in flight is coalesced.
pub struct OrchestrationController {
    config: OrchestratorConfig,
    catalog: AlgorithmCatalog,
    registry: Arc<dyn DeviceRegistry>,
    benchmarks: SharedBenchmarks,
    prices: Arc<dyn PriceFeed>,
    balance: Arc<dyn BalanceFeed>,
    supervisor: MinerSupervisor,
    aggregator: StatusAggregator,
    session: Mutex<Option<ActiveSession>>,
    pending_settings: SyncMutex<Option<Settings>>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    reoptimize_gate: SyncMutex<ReoptimizeGate>,
    cancel: SyncMutex<CancellationToken>,
    price_changed: Notify,
    stats: SyncMutex<ControllerStats>,
}

impl OrchestrationController {
    pub fn new(
        config: OrchestratorConfig,
        catalog: AlgorithmCatalog,
        registry: Arc<dyn DeviceRegistry>,
        benchmarks: SharedBenchmarks,
        prices: Arc<dyn PriceFeed>,
        balance: Arc<dyn BalanceFeed>,
        supervisor: MinerSupervisor,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(256);

        Self {
            config,
            catalog,
            registry,
            benchmarks,
            prices,
            balance,
            supervisor,
            aggregator: StatusAggregator::new(),
            session: Mutex::new(None),
            pending_settings: SyncMutex::new(None),
            state,
            events,
            reoptimize_gate: SyncMutex::new(ReoptimizeGate::default()),
            cancel: SyncMutex::new(CancellationToken::new()),
            price_changed: Notify::new(),
            stats: SyncMutex::new(ControllerStats::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> ControllerStats {
        *self.stats.lock()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.aggregator.snapshot()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.aggregator.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current assignment, if a session is active
    pub async fn assignment(&self) -> Option<Assignment> {
        self.session.lock().await.as_ref().map(|s| s.assignment.clone())
    }

    /// Instances with a live miner process
    pub async fn running_instances(&self) -> Vec<AssignmentEntry> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.running_entries().into_iter().collect())
            .unwrap_or_default()
    }

    /// Settings of the active session
    pub async fn settings(&self) -> Option<Settings> {
        self.session.lock().await.as_ref().map(|s| s.settings.clone())
    }

    fn set_state(&self, to: SessionState) {
        let from = self.state.send_replace(to);
        if from != to {
            info!("Session {} -> {}", from, to);
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    async fn start_entry(
        &self,
        session: &ActiveSession,
        entry: &AssignmentEntry,
        cancel: &CancellationToken,
    ) -> Result<MinerProcess, StartupError> {
        let algorithm = session
            .catalog
            .get(&entry.algorithm)
            .or_else(|| self.catalog.get(&entry.algorithm))
            .cloned()
            .ok_or_else(|| StartupError::Launch {
                algorithm: entry.algorithm.clone(),
                source: crate::error::BackendError::Other("algorithm not in catalog".to_string()),
            })?;
        let devices: Vec<Device> = session
            .enumerated
            .iter()
            .filter(|d| entry.devices.contains(&d.id))
            .cloned()
            .collect();

        self.supervisor
            .start(entry.clone(), &algorithm, &devices, &session.launch, cancel)
            .await
    }

    /// Stop every process concurrently
    async fn stop_all(&self, processes: &mut [MinerProcess]) {
        join_all(processes.iter_mut().map(|p| self.supervisor.stop(p))).await;
    }

    /// Enumerate, optimize and start every instance. Rolls back on any
    /// startup failure.
    pub async fn start(&self, settings: Settings) -> Result<(), SessionError> {
        let mut guard = self.session.lock().await;
        let current = self.state();
        if current != SessionState::Idle || guard.is_some() {
            return Err(SessionError::InvalidState {
                expected: SessionState::Idle,
                actual: current,
            });
        }
        settings.validate()?;

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        self.pending_settings.lock().take();
        self.set_state(SessionState::Starting);

        let enumerated = match self.registry.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                Vec::new()
            }
        };
        let mut session = ActiveSession::new(settings, enumerated, &self.catalog);
        if session.devices.is_empty() {
            error!("No usable devices");
            self.emit(SessionEvent::StartFailed(SessionError::NoUsableDevices.to_string()));
            self.set_state(SessionState::Idle);
            return Err(SessionError::NoUsableDevices);
        }

        let prices = self.prices.current_prices().unwrap_or_else(|| {
            warn!("No price data, nothing will be considered profitable");
            Default::default()
        });
        let assignment = {
            let benchmarks = self.benchmarks.read();
            session
                .engine
                .optimize(&session.devices, &session.catalog, &benchmarks, &prices)
        };
        self.stats.lock().optimize_cycles += 1;

        for entry in assignment.instances(&session.catalog) {
            match self.start_entry(&session, &entry, &cancel).await {
                Ok(process) => session.processes.push(process),
                Err(e) => {
                    error!("Session start failed: {}", e);
                    self.stop_all(&mut session.processes).await;
                    self.emit(SessionEvent::StartFailed(e.to_string()));
                    self.set_state(SessionState::Idle);
                    return Err(match e {
                        StartupError::Cancelled(_) => SessionError::Cancelled,
                        other => SessionError::StartFailed(other),
                    });
                }
            }
        }

        info!(
            "Mining {} instance(s) on {} device(s)",
            session.processes.len(),
            assignment.device_map().len()
        );
        session.assignment = assignment;
        self.aggregator.set_balance(self.balance.current_balance());
        self.aggregator.rebuild(&session.assignment);
        *guard = Some(session);
        self.set_state(SessionState::Mining);
        Ok(())
    }

    /// Stop every process and purge the status. Interrupts an in-progress
    /// start. Never fails.
    pub async fn stop(&self) {
        self.cancel.lock().cancel();

        let mut guard = self.session.lock().await;
        if let Some(mut session) = guard.take() {
            self.set_state(SessionState::Stopping);
            self.stop_all(&mut session.processes).await;
        }
        self.aggregator.clear();
        self.set_state(SessionState::Idle);
    }

    /// Store settings to apply at the next reoptimization
    pub fn update_settings(&self, settings: Settings) {
        *self.pending_settings.lock() = Some(settings);
    }

    /// Wake the driver loop to reoptimize
    pub fn notify_price_change(&self) {
        self.price_changed.notify_one();
    }

    /// Recompute the assignment and apply the difference.
    ///
    /// A request arriving while another is in flight returns `Coalesced`
    /// and makes the running one do a single extra cycle once it finishes,
    /// so the last applied assignment always reflects the newest inputs.
    pub async fn reoptimize(&self) -> Result<ReoptimizeOutcome, SessionError> {
        let Some(mut gate) = GateGuard::enter(&self.reoptimize_gate) else {
            info!("Reoptimization already in flight, coalescing request");
            self.stats.lock().coalesced += 1;
            return Ok(ReoptimizeOutcome::Coalesced);
        };

        let mut guard = self.session.lock().await;
        let current = self.state();
        let session = match guard.as_mut() {
            Some(session) if current == SessionState::Mining => session,
            _ => {
                return Err(SessionError::InvalidState {
                    expected: SessionState::Mining,
                    actual: current,
                })
            }
        };

        let mut outcome: Option<ReoptimizeOutcome> = None;
        let mut last_prices: Option<PriceMap> = None;
        loop {
            if let Some(cycle) = self.reoptimize_cycle(session, &mut last_prices).await {
                outcome = Some(match outcome {
                    Some(previous) => previous.merge(cycle),
                    None => cycle,
                });
            }
            if !gate.rerun_requested() {
                break;
            }
            debug!("Reoptimization requested while running, checking inputs again");
        }

        Ok(outcome.unwrap_or(ReoptimizeOutcome::Unchanged))
    }

    /// One optimize and apply pass. `None` when neither prices nor
    /// settings changed since `last_prices` was applied.
    async fn reoptimize_cycle(
        &self,
        session: &mut ActiveSession,
        last_prices: &mut Option<PriceMap>,
    ) -> Option<ReoptimizeOutcome> {
        let settings = self.pending_settings.lock().take();
        let settings_changed = settings.is_some();
        if let Some(settings) = settings {
            match settings.validate() {
                Ok(()) => {
                    info!("Applying updated settings");
                    session.apply_settings(settings, &self.catalog);
                }
                Err(e) => warn!("Ignoring invalid settings: {}", e),
            }
        }

        let Some(prices) = self.prices.current_prices() else {
            warn!("No price data, skipping reoptimization");
            return Some(ReoptimizeOutcome::Skipped);
        };
        if !settings_changed && last_prices.as_ref() == Some(&prices) {
            return None;
        }

        self.set_state(SessionState::Reoptimizing);
        let next = {
            let benchmarks = self.benchmarks.read();
            session.engine.optimize_from(
                &session.assignment,
                &session.devices,
                &session.catalog,
                &benchmarks,
                &prices,
            )
        };
        self.stats.lock().optimize_cycles += 1;

        let outcome = self.apply(session, next).await;
        self.set_state(SessionState::Mining);
        *last_prices = Some(prices);
        Some(outcome)
    }

    /// Stop processes that lost a device, then start instances for every
    /// device no surviving process covers. A pooled instance keeps running
    /// when devices join its algorithm; the newcomers get their own.
    async fn apply(&self, session: &mut ActiveSession, next: Assignment) -> ReoptimizeOutcome {
        let wanted = next.device_map();
        let (kept, mut superseded): (Vec<MinerProcess>, Vec<MinerProcess>) =
            session.processes.drain(..).partition(|p| {
                p.devices()
                    .iter()
                    .all(|d| wanted.get(d) == Some(&p.entry().algorithm))
            });
        session.processes = kept;

        let mut uncovered = next.clone();
        for process in &session.processes {
            for device in process.devices() {
                uncovered.unassign(device);
            }
        }
        let to_start = uncovered.instances(&session.catalog);

        if superseded.is_empty() && to_start.is_empty() {
            debug!("Assignment unchanged");
            session.assignment = next;
            return ReoptimizeOutcome::Unchanged;
        }

        self.stop_all(&mut superseded).await;
        for process in &superseded {
            self.aggregator
                .remove_devices(&process.entry().algorithm, process.devices());
        }
        let stopped: Vec<AssignmentEntry> = superseded.iter().map(|p| p.entry().clone()).collect();

        let cancel = self.current_token();
        let mut assignment = next;
        let mut started = Vec::new();
        let mut failed = Vec::new();
        for entry in to_start {
            match self.start_entry(session, &entry, &cancel).await {
                Ok(process) => {
                    session.processes.push(process);
                    started.push(entry);
                }
                Err(e) => {
                    warn!("Failed to start {}, leaving its devices idle: {}", entry, e);
                    for device in &entry.devices {
                        assignment.unassign(device);
                    }
                    failed.push(entry);
                }
            }
        }

        session.assignment = assignment;
        self.aggregator.rebuild(&session.assignment);

        info!(
            "Reassigned: {} stopped, {} started, {} failed",
            stopped.len(),
            started.len(),
            failed.len()
        );
        let outcome = ReoptimizeOutcome::Applied {
            stopped: stopped.len(),
            started: started.len(),
            failed: failed.len(),
        };
        self.emit(SessionEvent::Reassigned {
            stopped,
            started,
            failed,
        });
        outcome
    }

    /// Poll every process, merge telemetry and restart crashed instances
    pub async fn tick(&self) -> TickReport {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return TickReport::default();
        };
        if self.state() != SessionState::Mining {
            return TickReport::default();
        }

        let prices = self.prices.current_prices();
        let prices = prices.as_ref();
        let supervisor = &self.supervisor;
        let aggregator = &self.aggregator;

        let reports = join_all(session.processes.iter_mut().map(move |process| async move {
            let report = supervisor.poll(process, prices).await;
            if let Some(telemetry) = &report.telemetry {
                aggregator.update(process.algorithm(), telemetry);
            }
            report
        }))
        .await;

        let mut report = TickReport {
            polled: reports.len(),
            ..Default::default()
        };

        let crashed: Vec<usize> = reports
            .iter()
            .enumerate()
            .filter(|(_, r)| r.crash.is_some())
            .map(|(i, _)| i)
            .collect();

        let mut crashes = Vec::new();
        for index in crashed.into_iter().rev() {
            let mut process = session.processes.remove(index);
            self.supervisor.stop(&mut process).await;
            self.aggregator
                .remove_devices(&process.entry().algorithm, process.devices());
            if let Some(crash) = reports[index].crash.clone() {
                self.emit(SessionEvent::ProcessCrashed(crash));
            }
            crashes.push(process.entry().clone());
        }
        report.crashed = crashes.len();

        let cancel = self.current_token();
        for entry in crashes {
            info!("Restarting {}", entry);
            match self.start_entry(session, &entry, &cancel).await {
                Ok(process) => {
                    session.processes.push(process);
                    self.stats.lock().restarts += 1;
                    report.restarted += 1;
                    self.emit(SessionEvent::Restarted(entry));
                }
                Err(e) => {
                    error!("Restart of {} failed, devices idle until reoptimization: {}", entry, e);
                    for device in &entry.devices {
                        session.assignment.unassign(device);
                    }
                }
            }
        }

        self.aggregator.set_balance(self.balance.current_balance());
        self.aggregator.publish();
        report
    }

    async fn run_reoptimize(&self) {
        match self.reoptimize().await {
            Ok(outcome) => debug!("Reoptimize: {:?}", outcome),
            Err(SessionError::InvalidState { .. }) => {}
            Err(e) => warn!("Reoptimize failed: {}", e),
        }
    }

    /// Drive ticks and periodic reoptimization until `shutdown` fires
    pub fn spawn_driver(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let min = Duration::from_millis(1);
            let mut ticks = interval(controller.config.tick_interval().max(min));
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let period = controller.config.reoptimize_interval().max(min);
            let mut reoptimize = interval_at(Instant::now() + period, period);
            reoptimize.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticks.tick() => {
                        controller.tick().await;
                    }
                    _ = reoptimize.tick() => controller.run_reoptimize().await,
                    _ = controller.price_changed.notified() => controller.run_reoptimize().await,
                }
            }
            debug!("Session driver stopped");
        })
    }
}
