use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{GovernorError, Result};

pub type CoreId = usize;

pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Largest `NR_CPUS` the kernel can be configured with
pub const MAX_CPU_IDS: CoreId = 8192;

/// Brings cores on and off line
pub trait CoreExecutor: Send + Sync {
    fn possible_cores(&self) -> Result<BTreeSet<CoreId>>;

    fn online_cores(&self) -> Result<BTreeSet<CoreId>>;

    fn is_online(&self, core: CoreId) -> bool {
        self.online_cores()
            .map(|online| online.contains(&core))
            .unwrap_or(false)
    }

    /// Succeeds without doing anything if the core is already online.
    fn bring_online(&self, core: CoreId) -> Result<()>;

    /// Succeeds without doing anything if the core is already offline.
    fn take_offline(&self, core: CoreId) -> Result<()>;
}

/// Parse a kernel cpu list such as `0-3,5,7-8`
pub fn parse_cpu_list(list: &str) -> Result<BTreeSet<CoreId>> {
    if list
        .chars()
        .any(|c| !c.is_ascii_digit() && c != '-' && c != ',' && !c.is_whitespace())
    {
        return Err(GovernorError::CpuList(format!(
            "invalid character in {:?}",
            list.trim()
        )));
    }

    let mut cpus = BTreeSet::new();
    for token in list.trim().split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if let Some((start, end)) = token.split_once('-') {
            let start = start
                .trim()
                .parse::<CoreId>()
                .map_err(|_| GovernorError::CpuList(format!("invalid range start in {token:?}")))?;
            let end = end
                .trim()
                .parse::<CoreId>()
                .map_err(|_| GovernorError::CpuList(format!("invalid range end in {token:?}")))?;
            if start > end {
                return Err(GovernorError::CpuList(format!(
                    "invalid range {start}-{end}"
                )));
            }
            if end >= MAX_CPU_IDS {
                return Err(GovernorError::CpuList(format!(
                    "cpu {end} exceeds {MAX_CPU_IDS} cpu ids"
                )));
            }
            cpus.extend(start..=end);
        } else {
            let cpu = token
                .parse::<CoreId>()
                .map_err(|_| GovernorError::CpuList(format!("invalid cpu {token:?}")))?;
            if cpu >= MAX_CPU_IDS {
                return Err(GovernorError::CpuList(format!(
                    "cpu {cpu} exceeds {MAX_CPU_IDS} cpu ids"
                )));
            }
            cpus.insert(cpu);
        }
    }
    Ok(cpus)
}

/// Render the online state of every possible core, lowest first (`1101`)
pub fn online_mask(possible: &BTreeSet<CoreId>, online: &BTreeSet<CoreId>) -> String {
    possible
        .iter()
        .map(|cpu| if online.contains(cpu) { '1' } else { '0' })
        .collect()
}

/// Core hotplug through `/sys/devices/system/cpu`
#[derive(Debug, Clone)]
pub struct SysfsCores {
    root: PathBuf,
}

impl SysfsCores {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_list(&self, name: &str) -> Result<BTreeSet<CoreId>> {
        let path = self.root.join(name);
        let content = std::fs::read_to_string(&path).map_err(|e| GovernorError::io(&path, e))?;
        parse_cpu_list(&content)
    }

    fn write_online(&self, core: CoreId, value: &str) -> Result<()> {
        let path = self.root.join(format!("cpu{core}")).join("online");
        std::fs::write(&path, value).map_err(|e| GovernorError::io(&path, e))
    }
}

impl Default for SysfsCores {
    fn default() -> Self {
        Self::new(SYSFS_CPU_ROOT)
    }
}

impl CoreExecutor for SysfsCores {
    fn possible_cores(&self) -> Result<BTreeSet<CoreId>> {
        self.read_list("possible")
    }

    fn online_cores(&self) -> Result<BTreeSet<CoreId>> {
        self.read_list("online")
    }

    fn bring_online(&self, core: CoreId) -> Result<()> {
        if self.online_cores()?.contains(&core) {
            return Ok(());
        }
        self.write_online(core, "1")
    }

    fn take_offline(&self, core: CoreId) -> Result<()> {
        if !self.online_cores()?.contains(&core) {
            return Ok(());
        }
        self.write_online(core, "0")
    }
}
