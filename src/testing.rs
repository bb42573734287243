//! In-memory capabilities for unit tests

use std::collections::{BTreeSet, HashMap};
use std::io::Error as IoError;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cpu::{CoreExecutor, CoreId};
use crate::error::{GovernorError, Result};
use crate::freq::FrequencySampler;

pub struct FakeCores {
    possible: BTreeSet<CoreId>,
    online: Mutex<BTreeSet<CoreId>>,
    failing: Mutex<BTreeSet<CoreId>>,
    writes: AtomicUsize,
}

impl FakeCores {
    pub fn new(possible: usize, online: &[CoreId]) -> Self {
        Self {
            possible: (0..possible).collect(),
            online: Mutex::new(online.iter().copied().collect()),
            failing: Mutex::new(BTreeSet::new()),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn possible(&self) -> BTreeSet<CoreId> {
        self.possible.clone()
    }

    pub fn online(&self) -> BTreeSet<CoreId> {
        self.online.lock().unwrap().clone()
    }

    pub fn fail_on(&self, core: CoreId) {
        self.failing.lock().unwrap().insert(core);
    }

    /// Number of state-changing writes performed
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn set(&self, core: CoreId, online: bool) -> Result<()> {
        if !self.possible.contains(&core) || self.failing.lock().unwrap().contains(&core) {
            return Err(GovernorError::io(
                format!("cpu{core}/online"),
                IoError::other("write rejected"),
            ));
        }
        let mut set = self.online.lock().unwrap();
        let changed = if online {
            set.insert(core)
        } else {
            set.remove(&core)
        };
        if changed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl CoreExecutor for FakeCores {
    fn possible_cores(&self) -> Result<BTreeSet<CoreId>> {
        Ok(self.possible.clone())
    }

    fn online_cores(&self) -> Result<BTreeSet<CoreId>> {
        Ok(self.online())
    }

    fn bring_online(&self, core: CoreId) -> Result<()> {
        self.set(core, true)
    }

    fn take_offline(&self, core: CoreId) -> Result<()> {
        self.set(core, false)
    }
}

pub struct FakeSampler {
    max: Mutex<Option<u32>>,
    rates: Mutex<HashMap<CoreId, u32>>,
}

impl FakeSampler {
    /// Every core shares `max`; cores missing from `rates` report no data.
    pub fn new(max: u32, rates: &[(CoreId, u32)]) -> Self {
        Self {
            max: Mutex::new(Some(max)),
            rates: Mutex::new(rates.iter().copied().collect()),
        }
    }

    pub fn uniform(cores: usize, max: u32, rate: u32) -> Self {
        let rates: Vec<_> = (0..cores).map(|core| (core, rate)).collect();
        Self::new(max, &rates)
    }

    pub fn set_all(&self, rate: u32) {
        for value in self.rates.lock().unwrap().values_mut() {
            *value = rate;
        }
    }

    pub fn clear_max(&self) {
        *self.max.lock().unwrap() = None;
    }
}

impl FrequencySampler for FakeSampler {
    fn current_rate(&self, core: CoreId) -> Option<u32> {
        self.rates.lock().unwrap().get(&core).copied()
    }

    fn max_rate(&self, _core: CoreId) -> Option<u32> {
        *self.max.lock().unwrap()
    }
}
