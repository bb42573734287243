use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cpu::CoreId;
use crate::error::{GovernorError, Result};
use crate::governor::Decision;

/// Hotplug activity since the controller was created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugStats {
    pub cycles: u64,
    pub online_events: u64,
    pub offline_events: u64,
    pub times_hotplugged: BTreeMap<CoreId, u64>,
}

impl HotplugStats {
    pub fn record(&mut self, decision: Decision) {
        self.cycles += 1;
        let core = match decision {
            Decision::NoOp => return,
            Decision::OnlineCore(core) => {
                self.online_events += 1;
                core
            }
            Decision::OfflineCore(core) => {
                self.offline_events += 1;
                core
            }
        };
        *self.times_hotplugged.entry(core).or_default() += 1;
    }

    /// Total cores brought online or taken offline
    pub fn hotplug_events(&self) -> u64 {
        self.online_events + self.offline_events
    }

    /// One `<core> <count>` line per possible core
    pub fn render_times_hotplugged(&self, possible: &BTreeSet<CoreId>) -> String {
        let mut out = String::new();
        for core in possible {
            let count = self.times_hotplugged.get(core).copied().unwrap_or(0);
            let _ = writeln!(out, "{core} {count}");
        }
        out
    }
}

/// Outcome of one decision cycle, published to subscribers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub decision: Decision,
    pub online: usize,
    pub counter: u32,
}

/// Write a JSON snapshot atomically through a temporary file
pub fn write_stats_file(path: &Path, stats: &HotplugStats) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GovernorError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(stats)
        .map_err(|e| GovernorError::io(path, std::io::Error::other(e)))?;
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path).map_err(|e| GovernorError::io(&temp_path, e))?;
    file.write_all(json.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .and_then(|()| file.flush())
        .map_err(|e| GovernorError::io(&temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| GovernorError::io(path, e))
}

/// Keeps the stats file in step with the hotplug counters.
///
/// Reports only carry the latest cycle, so a change can be followed by a
/// no-op before the writer looks; the counters are compared instead.
pub struct StatsWriter {
    path: PathBuf,
    written: Option<u64>,
}

impl StatsWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: None,
        }
    }

    /// Write the snapshot if the topology changed since the last write.
    /// Returns whether the file was written.
    pub fn refresh(&mut self, stats: &HotplugStats) -> Result<bool> {
        let events = stats.hotplug_events();
        if self.written == Some(events) {
            return Ok(false);
        }
        write_stats_file(&self.path, stats)?;
        self.written = Some(events);
        Ok(true)
    }
}
