use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{error, info, warn};
use watch::WatchSender;

use crate::config::GovernorConfig;
use crate::constants::{DEFAULT_POLL_INTERVAL_MS, SUSPEND_CORE, WORKER_NAME};
use crate::cpu::{CoreExecutor, CoreId};
use crate::error::{GovernorError, Result};
use crate::freq::FrequencySampler;
use crate::governor::{CycleCounter, DecisionEngine, REFERENCE_CORE};
use crate::lock;
use crate::power::{ClientId, PowerCallback, PowerEvent, PowerNotifier};
use crate::scheduler::PeriodicTask;
use crate::stats::{CycleReport, HotplugStats};

/// Turns the hotplug governor on and off and reacts to power-state changes.
///
/// Stopped and Running are the only states. `enabled` in the configuration is
/// the switch between them; every transition, including suspend and resume,
/// is serialized on the lifecycle lock.
pub struct Controller {
    inner: Arc<Inner>,
}

struct Inner {
    config: Mutex<GovernorConfig>,
    cores: Arc<dyn CoreExecutor>,
    notifier: Option<Arc<dyn PowerNotifier>>,
    possible: BTreeSet<CoreId>,
    lifecycle: Mutex<Lifecycle>,
    // only the worker runs cycles; the lock serves readers of the counter
    engine: Mutex<DecisionEngine>,
    stats: Mutex<HotplugStats>,
    reports: Option<Mutex<WatchSender<CycleReport>>>,
}

#[derive(Default)]
struct Lifecycle {
    worker: Option<PeriodicTask>,
    client: Option<ClientId>,
}

impl Controller {
    pub fn new(
        config: GovernorConfig,
        cores: Arc<dyn CoreExecutor>,
        sampler: Arc<dyn FrequencySampler>,
        notifier: Option<Arc<dyn PowerNotifier>>,
        reports: Option<WatchSender<CycleReport>>,
    ) -> Result<Self> {
        let possible = cores.possible_cores()?;
        let engine = DecisionEngine::new(cores.clone(), sampler, possible.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                config: Mutex::new(config),
                cores,
                notifier,
                possible,
                lifecycle: Mutex::new(Lifecycle::default()),
                engine: Mutex::new(engine),
                stats: Mutex::new(HotplugStats::default()),
                reports: reports.map(Mutex::new),
            }),
        })
    }

    /// Start the governor if the configuration enables it and it is not
    /// already running or suspended
    pub fn start_if_enabled(&self) -> Result<()> {
        let mut lifecycle = lock(&self.inner.lifecycle);
        let config = self.config();
        if !config.enabled
            || config.suspended
            || lifecycle.worker.is_some()
            || lifecycle.client.is_some()
        {
            return Ok(());
        }
        self.inner.start(&mut lifecycle)
    }

    /// Flip the master switch. Setting the current value does nothing.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut lifecycle = lock(&self.inner.lifecycle);
        {
            let mut config = lock(&self.inner.config);
            if config.enabled == enabled {
                return Ok(());
            }
            config.enabled = enabled;
        }

        if enabled {
            self.inner.start(&mut lifecycle)
        } else {
            self.inner.stop(&mut lifecycle);
            Ok(())
        }
    }

    /// Stop the governor and bring every core back online
    pub fn shutdown(&self) {
        if let Err(e) = self.set_enabled(false) {
            // stopping cannot fail, only starting can
            warn!("shutdown: {e}");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.lifecycle)
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    pub fn config(&self) -> GovernorConfig {
        self.inner.config()
    }

    pub(crate) fn update_config<R>(&self, update: impl FnOnce(&mut GovernorConfig) -> R) -> R {
        update(&mut lock(&self.inner.config))
    }

    pub fn possible_cores(&self) -> &BTreeSet<CoreId> {
        &self.inner.possible
    }

    pub fn counter(&self) -> CycleCounter {
        lock(&self.inner.engine).counter()
    }

    pub fn stats(&self) -> HotplugStats {
        lock(&self.inner.stats).clone()
    }
}

impl Inner {
    fn config(&self) -> GovernorConfig {
        *lock(&self.config)
    }

    fn start(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> Result<()> {
        if let (Some(notifier), None) = (&self.notifier, lifecycle.client) {
            let weak = Arc::downgrade(self);
            let callback: PowerCallback = Arc::new(move |event: PowerEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_power_event(event);
                }
            });
            match notifier.register(callback) {
                Ok(client) => lifecycle.client = Some(client),
                Err(e) => {
                    error!("{e}");
                    self.disable(lifecycle);
                    return Err(e);
                }
            }
        }

        match self.arm() {
            Ok(worker) => lifecycle.worker = Some(worker),
            Err(e) => {
                error!("{e}");
                self.disable(lifecycle);
                return Err(e);
            }
        }

        let config = self.config();
        info!(
            "started: {} possible cores, {}-{} online, polling every {:?}",
            self.possible.len(),
            config.min_cores,
            config.max_cores,
            config.poll_interval
        );
        Ok(())
    }

    fn stop(&self, lifecycle: &mut Lifecycle) {
        self.unregister(lifecycle);
        if let Some(worker) = lifecycle.worker.take() {
            worker.cancel();
        }
        self.online_up_to(usize::MAX);
        lock(&self.config).suspended = false;
        info!("stopped, all cores online");
    }

    /// Leave the governor stopped after a failed start
    fn disable(&self, lifecycle: &mut Lifecycle) {
        self.unregister(lifecycle);
        if let Some(worker) = lifecycle.worker.take() {
            worker.cancel();
        }
        lock(&self.config).enabled = false;
    }

    fn unregister(&self, lifecycle: &mut Lifecycle) {
        if let (Some(notifier), Some(client)) = (&self.notifier, lifecycle.client.take()) {
            notifier.unregister(client);
        }
    }

    fn arm(self: &Arc<Self>) -> Result<PeriodicTask> {
        let for_interval = Arc::downgrade(self);
        let for_tick: Weak<Self> = Arc::downgrade(self);
        PeriodicTask::spawn(
            WORKER_NAME,
            move || {
                for_interval.upgrade().map_or(
                    Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
                    |inner| inner.config().poll_interval,
                )
            },
            move || for_tick.upgrade().is_some_and(|inner| inner.tick()),
        )
        .map_err(GovernorError::WorkerSpawn)
    }

    /// One decision cycle. Returns whether to run again.
    fn tick(&self) -> bool {
        let config = self.config();
        if !config.enabled {
            return false;
        }

        let report = {
            let mut engine = lock(&self.engine);
            let decision = engine.run_cycle(&config);
            CycleReport {
                decision,
                online: engine.online(),
                counter: engine.counter().get(),
            }
        };
        lock(&self.stats).record(report.decision);
        if let Some(reports) = &self.reports {
            lock(reports).send(report);
        }
        true
    }

    fn on_power_event(self: &Arc<Self>, event: PowerEvent) {
        let mut lifecycle = lock(&self.lifecycle);
        if !self.config().enabled {
            return;
        }
        match event {
            PowerEvent::Suspend => self.suspend(&mut lifecycle),
            PowerEvent::Active => self.resume(&mut lifecycle),
        }
    }

    fn suspend(&self, lifecycle: &mut Lifecycle) {
        if let Some(worker) = lifecycle.worker.take() {
            worker.cancel();
        }

        match self.cores.online_cores() {
            Ok(online) => {
                for &core in online.iter().filter(|&&core| core != REFERENCE_CORE) {
                    if let Err(e) = self.cores.take_offline(core) {
                        warn!("suspend: {e}");
                    }
                }
            }
            Err(e) => warn!("suspend: {e}"),
        }
        // keep 0-1 online while the screen is off
        if self.possible.contains(&SUSPEND_CORE) {
            if let Err(e) = self.cores.bring_online(SUSPEND_CORE) {
                warn!("suspend: {e}");
            }
        }

        lock(&self.config).suspended = true;
        info!("Screen -> Off. Suspended.");
    }

    fn resume(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        self.online_up_to(self.config().max_cores);
        lock(&self.config).suspended = false;

        if lifecycle.worker.as_ref().is_none_or(|worker| worker.is_finished()) {
            match self.arm() {
                Ok(worker) => lifecycle.worker = Some(worker),
                Err(e) => {
                    error!("resume: {e}");
                    self.disable(lifecycle);
                    return;
                }
            }
        }
        info!("Screen -> On. Resumed.");
    }

    /// Bring possible cores online, lowest first, until `limit` are online
    fn online_up_to(&self, limit: usize) {
        for &core in &self.possible {
            if self.cores.is_online(core) {
                continue;
            }
            let online = self.cores.online_cores().map_or(0, |online| online.len());
            if online >= limit {
                break;
            }
            if let Err(e) = self.cores.bring_online(core) {
                warn!("failed to bring cpu{core} online: {e}");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let lifecycle = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let (Some(notifier), Some(client)) = (&self.notifier, lifecycle.client.take()) {
            notifier.unregister(client);
        }
    }
}
