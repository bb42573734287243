use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::GovernorConfig;
use crate::cpu::{CoreExecutor, CoreId, online_mask};
use crate::error::Result;
use crate::freq::FrequencySampler;

/// Core 0 is the reference clock and is never taken offline
pub const REFERENCE_CORE: CoreId = 0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[default]
    NoOp,
    OnlineCore(CoreId),
    OfflineCore(CoreId),
}

/// Cycles elapsed since the last topology change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCounter(u32);

impl CycleCounter {
    pub fn get(&self) -> u32 {
        self.0
    }

    fn tick(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Clock rates of the online cores for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSample {
    pub online: usize,
    pub rate0: u32,
    /// Slowest rate across every online core, core 0 included
    pub slowest_rate: u32,
    pub fastest_rate: u32,
    /// Slowest non-reference core, the only kind that may be removed
    pub slow_candidate: Option<(CoreId, u32)>,
}

impl LoadSample {
    /// A core without data counts as running at 0 kHz.
    pub fn collect(online: &BTreeSet<CoreId>, sampler: &dyn FrequencySampler) -> Self {
        let rate0 = sampler.current_rate(REFERENCE_CORE).unwrap_or(0);
        let mut fastest_rate = rate0;
        let mut slow_candidate: Option<(CoreId, u32)> = None;

        for &core in online.iter().filter(|&&core| core != REFERENCE_CORE) {
            let rate = sampler.current_rate(core).unwrap_or(0);
            if slow_candidate.is_none_or(|(_, slowest)| rate < slowest) {
                slow_candidate = Some((core, rate));
            }
            fastest_rate = fastest_rate.max(rate);
        }

        let slowest_rate = slow_candidate.map_or(rate0, |(_, rate)| rate.min(rate0));
        Self {
            online: online.len(),
            rate0,
            slowest_rate,
            fastest_rate,
            slow_candidate,
        }
    }
}

/// Samples the online cores and adds or removes at most one core per cycle
pub struct DecisionEngine {
    cores: Arc<dyn CoreExecutor>,
    sampler: Arc<dyn FrequencySampler>,
    possible: BTreeSet<CoreId>,
    counter: CycleCounter,
    online: usize,
}

impl DecisionEngine {
    pub fn new(
        cores: Arc<dyn CoreExecutor>,
        sampler: Arc<dyn FrequencySampler>,
        possible: BTreeSet<CoreId>,
    ) -> Self {
        Self {
            cores,
            sampler,
            possible,
            counter: CycleCounter::default(),
            online: 0,
        }
    }

    pub fn counter(&self) -> CycleCounter {
        self.counter
    }

    /// Online core count seen by the last cycle, after its action
    pub fn online(&self) -> usize {
        self.online
    }

    /// Run one cycle and return the topology change it applied
    pub fn run_cycle(&mut self, config: &GovernorConfig) -> Decision {
        self.counter.tick();

        let Some(reference_max) = self.sampler.max_rate(REFERENCE_CORE) else {
            debug!("no max rate for core {REFERENCE_CORE}, skipping cycle");
            return Decision::NoOp;
        };

        let mut online = match self.cores.online_cores() {
            Ok(online) => online,
            Err(e) => {
                warn!("failed to read online cores: {e}");
                return Decision::NoOp;
            }
        };
        self.online = online.len();

        let sample = LoadSample::collect(&online, self.sampler.as_ref());
        let decision = self.plan(config, &sample, &online, reference_max);
        debug!(
            "cycle {} | slow {} fast {} | {:?}",
            self.counter.get(),
            sample.slowest_rate,
            sample.fastest_rate,
            decision
        );
        if decision == Decision::NoOp {
            return decision;
        }

        if let Err(e) = self.apply(decision) {
            warn!("{decision:?} failed, retrying next cycle: {e}");
            return Decision::NoOp;
        }
        self.counter.reset();

        match decision {
            Decision::OnlineCore(core) => {
                online.insert(core);
                info!(
                    "CPU [{core}] On  | Mask [{}]",
                    online_mask(&self.possible, &online)
                );
            }
            Decision::OfflineCore(core) => {
                online.remove(&core);
                info!(
                    "CPU [{core}] Off | Mask [{}]",
                    online_mask(&self.possible, &online)
                );
            }
            Decision::NoOp => {}
        }
        self.online = online.len();
        decision
    }

    fn plan(
        &self,
        config: &GovernorConfig,
        sample: &LoadSample,
        online: &BTreeSet<CoreId>,
        reference_max: u32,
    ) -> Decision {
        let up_threshold = config.up_threshold(reference_max);
        let down_threshold = config.down_threshold(reference_max);
        let counter = self.counter.get();

        // every online core is busy: add one
        if u64::from(sample.slowest_rate) > up_threshold {
            if sample.online < config.max_cores && counter >= config.cycles_before_add {
                if let Some(&core) = self.possible.difference(online).next() {
                    return Decision::OnlineCore(core);
                }
            }
        // every online core is idle: remove the slowest
        } else if let Some((core, _)) = sample.slow_candidate {
            if u64::from(sample.fastest_rate) < down_threshold
                && sample.online > config.min_cores
                && counter >= config.cycles_before_remove
            {
                return Decision::OfflineCore(core);
            }
        }
        Decision::NoOp
    }

    /// Apply a decision. Cores already in the requested state are left alone.
    pub fn apply(&self, decision: Decision) -> Result<()> {
        match decision {
            Decision::NoOp => Ok(()),
            Decision::OnlineCore(core) if self.cores.is_online(core) => Ok(()),
            Decision::OnlineCore(core) => self.cores.bring_online(core),
            Decision::OfflineCore(core) if !self.cores.is_online(core) => Ok(()),
            Decision::OfflineCore(core) => self.cores.take_offline(core),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCores, FakeSampler};

    fn engine(cores: &Arc<FakeCores>, sampler: &Arc<FakeSampler>) -> DecisionEngine {
        DecisionEngine::new(cores.clone(), sampler.clone(), cores.possible())
    }

    fn config(min_cores: usize, max_cores: usize) -> GovernorConfig {
        GovernorConfig {
            min_cores,
            max_cores,
            ..GovernorConfig::new(max_cores)
        }
    }

    #[test]
    fn test_adds_one_core_when_saturated() {
        let cores = Arc::new(FakeCores::new(4, &[0, 1]));
        // the core brought online reports no data, hence rate 0
        let sampler = Arc::new(FakeSampler::new(1000, &[(0, 900), (1, 900)]));
        let mut engine = engine(&cores, &sampler);
        let config = config(1, 4);

        assert_eq!(engine.run_cycle(&config), Decision::OnlineCore(2));
        assert_eq!(engine.counter().get(), 0);
        assert_eq!(engine.run_cycle(&config), Decision::NoOp);
        assert_eq!(engine.counter().get(), 1);
        assert_eq!(cores.online(), BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn test_ramps_up_to_max_and_stays() {
        let cores = Arc::new(FakeCores::new(6, &[0]));
        let sampler = Arc::new(FakeSampler::uniform(6, 1000, 950));
        let mut engine = engine(&cores, &sampler);
        let config = config(1, 4);

        let added = (0..20)
            .filter(|_| matches!(engine.run_cycle(&config), Decision::OnlineCore(_)))
            .count();
        assert_eq!(added, 3);
        assert_eq!(cores.online(), BTreeSet::from([0, 1, 2, 3]));
        assert_eq!(engine.online(), 4);
    }

    #[test]
    fn test_ramps_down_to_min_and_stays() {
        let cores = Arc::new(FakeCores::new(4, &[0, 1, 2, 3]));
        let sampler = Arc::new(FakeSampler::uniform(4, 1000, 100));
        let mut engine = engine(&cores, &sampler);
        let config = config(2, 4);

        let mut removed = Vec::new();
        for _ in 0..20 {
            if let Decision::OfflineCore(core) = engine.run_cycle(&config) {
                removed.push(core);
            }
        }
        assert_eq!(removed, vec![1, 2]);
        assert_eq!(cores.online(), BTreeSet::from([0, 3]));
    }

    #[test]
    fn test_counter_debounces_add() {
        let cores = Arc::new(FakeCores::new(4, &[0]));
        let sampler = Arc::new(FakeSampler::uniform(4, 1000, 900));
        let mut engine = engine(&cores, &sampler);
        let config = GovernorConfig {
            cycles_before_add: 3,
            ..config(1, 4)
        };

        assert_eq!(engine.run_cycle(&config), Decision::NoOp);
        assert_eq!(engine.counter().get(), 1);
        assert_eq!(engine.run_cycle(&config), Decision::NoOp);
        assert_eq!(engine.counter().get(), 2);
        assert_eq!(engine.run_cycle(&config), Decision::OnlineCore(1));
        assert_eq!(engine.counter().get(), 0);
    }

    #[test]
    fn test_counter_debounces_remove() {
        let cores = Arc::new(FakeCores::new(2, &[0, 1]));
        let sampler = Arc::new(FakeSampler::uniform(2, 1000, 100));
        let mut engine = engine(&cores, &sampler);
        let config = config(1, 2);

        assert_eq!(engine.run_cycle(&config), Decision::NoOp);
        assert_eq!(engine.run_cycle(&config), Decision::OfflineCore(1));
        assert_eq!(engine.counter().get(), 0);
    }

    #[test]
    fn test_never_removes_reference_core() {
        let cores = Arc::new(FakeCores::new(4, &[0]));
        let sampler = Arc::new(FakeSampler::uniform(4, 1000, 0));
        let mut engine = engine(&cores, &sampler);
        let config = config(1, 4);

        for _ in 0..10 {
            assert_eq!(engine.run_cycle(&config), Decision::NoOp);
        }
        assert_eq!(engine.counter().get(), 10);
        assert_eq!(cores.online(), BTreeSet::from([0]));
    }

    #[test]
    fn test_removes_slowest_lowest_id() {
        let cores = Arc::new(FakeCores::new(4, &[0, 1, 2, 3]));
        let sampler = Arc::new(FakeSampler::new(
            1000,
            &[(0, 300), (1, 200), (2, 100), (3, 100)],
        ));
        let mut engine = engine(&cores, &sampler);
        let config = GovernorConfig {
            cycles_before_remove: 0,
            ..config(1, 4)
        };

        assert_eq!(engine.run_cycle(&config), Decision::OfflineCore(2));
    }

    #[test]
    fn test_busy_reference_core_blocks_removal() {
        let cores = Arc::new(FakeCores::new(4, &[0, 1, 2]));
        let sampler = Arc::new(FakeSampler::new(1000, &[(0, 900), (1, 100), (2, 100)]));
        let mut engine = engine(&cores, &sampler);
        let config = config(1, 4);

        for _ in 0..5 {
            assert_eq!(engine.run_cycle(&config), Decision::NoOp);
        }
    }

    #[test]
    fn test_idle_reference_core_blocks_add() {
        let cores = Arc::new(FakeCores::new(4, &[0, 1]));
        let sampler = Arc::new(FakeSampler::new(1000, &[(0, 100), (1, 900)]));
        let mut engine = engine(&cores, &sampler);

        assert_eq!(engine.run_cycle(&config(1, 4)), Decision::NoOp);
    }

    #[test]
    fn test_missing_sample_never_adds() {
        let cores = Arc::new(FakeCores::new(4, &[0, 1]));
        let sampler = Arc::new(FakeSampler::new(1000, &[(0, 900)]));
        let mut engine = engine(&cores, &sampler);

        let sample = LoadSample::collect(&cores.online(), sampler.as_ref());
        assert_eq!(sample.slow_candidate, Some((1, 0)));
        assert_eq!(sample.slowest_rate, 0);
        assert_eq!(engine.run_cycle(&config(1, 4)), Decision::NoOp);
    }

    #[test]
    fn test_missing_reference_max_is_noop() {
        let cores = Arc::new(FakeCores::new(4, &[0]));
        let sampler = Arc::new(FakeSampler::uniform(4, 1000, 900));
        sampler.clear_max();
        let mut engine = engine(&cores, &sampler);

        assert_eq!(engine.run_cycle(&config(1, 4)), Decision::NoOp);
        assert_eq!(engine.counter().get(), 1);
    }

    #[test]
    fn test_overlapping_thresholds_prefer_add() {
        let cores = Arc::new(FakeCores::new(4, &[0, 1]));
        let sampler = Arc::new(FakeSampler::uniform(4, 1000, 500));
        let mut engine = engine(&cores, &sampler);
        let config = GovernorConfig {
            ramp_up_percent: 40,
            ramp_down_percent: 60,
            cycles_before_remove: 0,
            ..config(1, 4)
        };

        assert_eq!(engine.run_cycle(&config), Decision::OnlineCore(2));
    }

    #[test]
    fn test_failed_action_keeps_counter() {
        let cores = Arc::new(FakeCores::new(4, &[0]));
        cores.fail_on(1);
        let sampler = Arc::new(FakeSampler::uniform(4, 1000, 900));
        let mut engine = engine(&cores, &sampler);

        assert_eq!(engine.run_cycle(&config(1, 4)), Decision::NoOp);
        assert_eq!(engine.counter().get(), 1);
        assert_eq!(cores.online(), BTreeSet::from([0]));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let cores = Arc::new(FakeCores::new(4, &[0, 1]));
        let sampler = Arc::new(FakeSampler::uniform(4, 1000, 0));
        let engine = engine(&cores, &sampler);

        engine.apply(Decision::OnlineCore(1)).unwrap();
        engine.apply(Decision::OfflineCore(3)).unwrap();
        assert_eq!(cores.online(), BTreeSet::from([0, 1]));
    }
}
