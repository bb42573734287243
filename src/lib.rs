// Public modules
pub mod config;
pub mod controller;
pub mod cpu;
pub mod error;
pub mod freq;
pub mod governor;
pub mod power;
pub mod scheduler;
pub mod stats;
pub mod tuning;

#[cfg(test)]
mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::GovernorConfig;
pub use controller::Controller;
pub use error::{GovernorError, Result};
pub use governor::Decision;

// Re-export constants commonly used
pub mod constants {
    use crate::cpu::CoreId;

    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
    pub const DEFAULT_MIN_CORES: usize = 1;
    pub const DEFAULT_RAMP_UP_PERCENT: u32 = 80;
    pub const DEFAULT_RAMP_DOWN_PERCENT: u32 = 50;
    pub const DEFAULT_CYCLES_BEFORE_ADD: u32 = 1;
    pub const DEFAULT_CYCLES_BEFORE_REMOVE: u32 = 2;

    /// Kept online next to core 0 while suspended
    pub const SUSPEND_CORE: CoreId = 1;

    pub const WORKER_NAME: &str = "autosmp_wq";
    pub const DEFAULT_CONFIG_PATH: &str = "/etc/autosmp/config.toml";
}

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
