use std::path::PathBuf;
use std::time::Duration;

use log::warn;
use toml::{Table, Value};

use crate::constants::*;

/// Parameters driving every hotplug decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorConfig {
    pub poll_interval: Duration,
    pub min_cores: usize,
    pub max_cores: usize,
    /// percent of core 0's max rate above which every online core counts as busy
    pub ramp_up_percent: u32,
    /// percent of core 0's max rate below which every online core counts as idle
    pub ramp_down_percent: u32,
    pub cycles_before_add: u32,
    pub cycles_before_remove: u32,
    pub suspended: bool,
    pub enabled: bool,
}

impl GovernorConfig {
    /// Defaults for a machine with `possible_cores` cores
    pub fn new(possible_cores: usize) -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            min_cores: DEFAULT_MIN_CORES,
            max_cores: possible_cores.max(1),
            ramp_up_percent: DEFAULT_RAMP_UP_PERCENT,
            ramp_down_percent: DEFAULT_RAMP_DOWN_PERCENT,
            cycles_before_add: DEFAULT_CYCLES_BEFORE_ADD,
            cycles_before_remove: DEFAULT_CYCLES_BEFORE_REMOVE,
            suspended: false,
            enabled: true,
        }
    }

    pub fn up_threshold(&self, reference_max: u32) -> u64 {
        u64::from(self.ramp_up_percent) * u64::from(reference_max) / 100
    }

    pub fn down_threshold(&self, reference_max: u32) -> u64 {
        u64::from(self.ramp_down_percent) * u64::from(reference_max) / 100
    }

    /// Build from a parsed config file. Missing or invalid values are
    /// replaced with their defaults and reported.
    pub fn from_table(config: &Table, possible_cores: usize) -> Self {
        let defaults = Self::new(possible_cores);

        let enabled = config
            .get("enabled")
            .map_or(Ok(defaults.enabled), |v| v.as_bool().ok_or("must be a boolean"))
            .unwrap_or_else(|s| {
                warn!("enabled {s}, replaced with the default of true");
                defaults.enabled
            });

        let timing = config.get("timing").and_then(|t| t.as_table());
        // ms
        let poll_interval = positive(timing.and_then(|t| t.get("poll-interval")))
            .map(Duration::from_millis)
            .unwrap_or_else(|s| {
                warn!(
                    "timing.poll-interval {s}, replaced with the default of {DEFAULT_POLL_INTERVAL_MS} ms"
                );
                defaults.poll_interval
            });

        let cores = config.get("cores").and_then(|t| t.as_table());
        let min_cores = positive(cores.and_then(|t| t.get("min")))
            .and_then(|v| usize::try_from(v).map_err(|_| "is too large"))
            .and_then(|v| {
                (v <= possible_cores.max(1))
                    .then_some(v)
                    .ok_or("cannot exceed the number of possible cores")
            })
            .unwrap_or_else(|s| {
                warn!("cores.min {s}, replaced with the default of {DEFAULT_MIN_CORES}");
                defaults.min_cores
            });
        let max_cores = positive(cores.and_then(|t| t.get("max")))
            .and_then(|v| usize::try_from(v).map_err(|_| "is too large"))
            .map(|v| {
                if v > defaults.max_cores {
                    warn!(
                        "cores.max can't exceed the {} possible cores, clamping",
                        defaults.max_cores
                    );
                }
                v.min(defaults.max_cores)
            })
            .unwrap_or_else(|s| {
                if cores.and_then(|t| t.get("max")).is_some() {
                    warn!("cores.max {s}, replaced with the number of possible cores");
                }
                defaults.max_cores
            });
        let max_cores = if max_cores < min_cores {
            warn!("cores.max can't be lower than cores.min, clamping");
            min_cores
        } else {
            max_cores
        };

        let ramp = config.get("ramp").and_then(|t| t.as_table());
        // percentage (0-100)
        let ramp_up_percent = percent(ramp.and_then(|t| t.get("up"))).unwrap_or_else(|s| {
            warn!("ramp.up {s}, replaced with the default of {DEFAULT_RAMP_UP_PERCENT}%");
            defaults.ramp_up_percent
        });
        // percentage (0-100)
        let ramp_down_percent = percent(ramp.and_then(|t| t.get("down"))).unwrap_or_else(|s| {
            warn!("ramp.down {s}, replaced with the default of {DEFAULT_RAMP_DOWN_PERCENT}%");
            defaults.ramp_down_percent
        });
        if ramp_down_percent > ramp_up_percent {
            warn!(
                "ramp.down is greater than ramp.up, cores will be added whenever both \
                thresholds match"
            );
        }

        let cycles = config.get("cycles").and_then(|t| t.as_table());
        let cycles_before_add = unsigned(cycles.and_then(|t| t.get("up"))).unwrap_or_else(|s| {
            warn!("cycles.up {s}, replaced with the default of {DEFAULT_CYCLES_BEFORE_ADD}");
            defaults.cycles_before_add
        });
        let cycles_before_remove =
            unsigned(cycles.and_then(|t| t.get("down"))).unwrap_or_else(|s| {
                warn!(
                    "cycles.down {s}, replaced with the default of {DEFAULT_CYCLES_BEFORE_REMOVE}"
                );
                defaults.cycles_before_remove
            });

        Self {
            poll_interval,
            min_cores,
            max_cores,
            ramp_up_percent,
            ramp_down_percent,
            cycles_before_add,
            cycles_before_remove,
            suspended: false,
            enabled,
        }
    }
}

/// File locations used by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub sysfs: PathBuf,
    pub stats: Option<PathBuf>,
}

impl DaemonPaths {
    pub fn from_table(config: &Table) -> Self {
        let paths = config.get("paths").and_then(|t| t.as_table());
        let sysfs = paths
            .and_then(|t| t.get("sysfs"))
            .and_then(|v| v.as_str())
            .map_or_else(|| PathBuf::from(crate::cpu::SYSFS_CPU_ROOT), PathBuf::from);
        let stats = paths
            .and_then(|t| t.get("stats"))
            .and_then(|v| v.as_str())
            .map(PathBuf::from);
        Self { sysfs, stats }
    }
}

fn positive(value: Option<&Value>) -> Result<u64, &'static str> {
    value
        .ok_or("is missing")
        .and_then(|v| v.as_integer().ok_or("must be an integer"))
        .and_then(|v| v.is_positive().then_some(v).ok_or("must be positive"))
        .and_then(|v| u64::try_from(v).map_err(|_| "is too large"))
}

fn unsigned(value: Option<&Value>) -> Result<u32, &'static str> {
    value
        .ok_or("is missing")
        .and_then(|v| v.as_integer().ok_or("must be an integer"))
        .and_then(|v| {
            (!v.is_negative())
                .then_some(v)
                .ok_or("must not be negative")
        })
        .and_then(|v| u32::try_from(v).map_err(|_| "is too large"))
}

fn percent(value: Option<&Value>) -> Result<u32, &'static str> {
    unsigned(value).and_then(|v| {
        (v <= 100)
            .then_some(v)
            .ok_or("must be between 0 and 100")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Table {
        text.parse::<Table>().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = GovernorConfig::new(8);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.min_cores, 1);
        assert_eq!(config.max_cores, 8);
        assert_eq!(config.ramp_up_percent, 80);
        assert_eq!(config.ramp_down_percent, 50);
        assert_eq!(config.cycles_before_add, 1);
        assert_eq!(config.cycles_before_remove, 2);
        assert!(config.enabled);
        assert!(!config.suspended);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(GovernorConfig::from_table(&parse(""), 4), GovernorConfig::new(4));
    }

    #[test]
    fn test_thresholds() {
        let config = GovernorConfig::new(4);
        assert_eq!(config.up_threshold(1000), 800);
        assert_eq!(config.down_threshold(1000), 500);
        // no overflow on large rates
        assert_eq!(config.up_threshold(u32::MAX), u64::from(u32::MAX) * 80 / 100);
    }

    #[test]
    fn test_full_file() {
        let table = parse(
            r#"
            enabled = false
            [timing]
            poll-interval = 250
            [cores]
            min = 2
            max = 3
            [ramp]
            up = 90
            down = 40
            [cycles]
            up = 3
            down = 5
            "#,
        );
        let config = GovernorConfig::from_table(&table, 4);
        assert!(!config.enabled);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!((config.min_cores, config.max_cores), (2, 3));
        assert_eq!((config.ramp_up_percent, config.ramp_down_percent), (90, 40));
        assert_eq!((config.cycles_before_add, config.cycles_before_remove), (3, 5));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let table = parse(
            r#"
            enabled = "yes"
            [timing]
            poll-interval = 0
            [ramp]
            up = 150
            down = "low"
            [cycles]
            up = -1
            "#,
        );
        assert_eq!(GovernorConfig::from_table(&table, 4), GovernorConfig::new(4));
    }

    #[test]
    fn test_core_bounds_are_clamped() {
        let table = parse("[cores]\nmin = 3\nmax = 16\n");
        let config = GovernorConfig::from_table(&table, 4);
        assert_eq!((config.min_cores, config.max_cores), (3, 4));

        let table = parse("[cores]\nmin = 3\nmax = 2\n");
        let config = GovernorConfig::from_table(&table, 4);
        assert_eq!((config.min_cores, config.max_cores), (3, 3));

        let table = parse("[cores]\nmin = 9\n");
        let config = GovernorConfig::from_table(&table, 4);
        assert_eq!(config.min_cores, 1);
    }

    #[test]
    fn test_overlapping_ramp_is_kept() {
        let table = parse("[ramp]\nup = 40\ndown = 60\n");
        let config = GovernorConfig::from_table(&table, 4);
        assert_eq!((config.ramp_up_percent, config.ramp_down_percent), (40, 60));
    }

    #[test]
    fn test_paths() {
        let paths = DaemonPaths::from_table(&parse(""));
        assert_eq!(paths.sysfs, PathBuf::from("/sys/devices/system/cpu"));
        assert_eq!(paths.stats, None);

        let paths = DaemonPaths::from_table(&parse(
            "[paths]\nsysfs = \"/tmp/cpu\"\nstats = \"/tmp/stats.json\"\n",
        ));
        assert_eq!(paths.sysfs, PathBuf::from("/tmp/cpu"));
        assert_eq!(paths.stats, Some(PathBuf::from("/tmp/stats.json")));
    }
}
