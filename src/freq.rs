use std::path::PathBuf;

use crate::cpu::{CoreId, SYSFS_CPU_ROOT};

/// Reports per-core clock rates in kHz. `None` means no data for that core.
pub trait FrequencySampler: Send + Sync {
    fn current_rate(&self, core: CoreId) -> Option<u32>;

    fn max_rate(&self, core: CoreId) -> Option<u32>;
}

/// Clock rates from the cpufreq sysfs interface
#[derive(Debug, Clone)]
pub struct SysfsFrequency {
    root: PathBuf,
}

impl SysfsFrequency {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_khz(&self, core: CoreId, file: &str) -> Option<u32> {
        let path = self
            .root
            .join(format!("cpu{core}"))
            .join("cpufreq")
            .join(file);
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl Default for SysfsFrequency {
    fn default() -> Self {
        Self::new(SYSFS_CPU_ROOT)
    }
}

impl FrequencySampler for SysfsFrequency {
    fn current_rate(&self, core: CoreId) -> Option<u32> {
        self.read_khz(core, "scaling_cur_freq")
    }

    // policy limit first, like cpufreq_quick_get_max
    fn max_rate(&self, core: CoreId) -> Option<u32> {
        self.read_khz(core, "scaling_max_freq")
            .or_else(|| self.read_khz(core, "cpuinfo_max_freq"))
    }
}
