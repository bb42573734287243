use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::info;

use crate::controller::Controller;
use crate::error::{GovernorError, Result};

/// Named parameters of the live tuning surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tunable {
    PollIntervalMs,
    MinCores,
    MaxCores,
    RampUpPercent,
    RampDownPercent,
    CyclesBeforeAdd,
    CyclesBeforeRemove,
    Enabled,
    Suspended,
    TimesHotplugged,
}

impl Tunable {
    pub const ALL: [Tunable; 10] = [
        Tunable::PollIntervalMs,
        Tunable::MinCores,
        Tunable::MaxCores,
        Tunable::RampUpPercent,
        Tunable::RampDownPercent,
        Tunable::CyclesBeforeAdd,
        Tunable::CyclesBeforeRemove,
        Tunable::Enabled,
        Tunable::Suspended,
        Tunable::TimesHotplugged,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tunable::PollIntervalMs => "poll_interval_ms",
            Tunable::MinCores => "min_cores",
            Tunable::MaxCores => "max_cores",
            Tunable::RampUpPercent => "ramp_up_percent",
            Tunable::RampDownPercent => "ramp_down_percent",
            Tunable::CyclesBeforeAdd => "cycles_before_add",
            Tunable::CyclesBeforeRemove => "cycles_before_remove",
            Tunable::Enabled => "enabled",
            Tunable::Suspended => "suspended",
            Tunable::TimesHotplugged => "times_hotplugged",
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, Tunable::Suspended | Tunable::TimesHotplugged)
    }
}

impl fmt::Display for Tunable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tunable {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Tunable::ALL
            .into_iter()
            .find(|tunable| tunable.name() == s)
            .ok_or_else(|| GovernorError::UnknownKey(s.to_string()))
    }
}

impl Controller {
    /// Current value as text, one trailing newline
    pub fn read_tunable(&self, key: &str) -> Result<String> {
        let config = self.config();
        let value = match key.parse::<Tunable>()? {
            Tunable::PollIntervalMs => config.poll_interval.as_millis().to_string(),
            Tunable::MinCores => config.min_cores.to_string(),
            Tunable::MaxCores => config.max_cores.to_string(),
            Tunable::RampUpPercent => config.ramp_up_percent.to_string(),
            Tunable::RampDownPercent => config.ramp_down_percent.to_string(),
            Tunable::CyclesBeforeAdd => config.cycles_before_add.to_string(),
            Tunable::CyclesBeforeRemove => config.cycles_before_remove.to_string(),
            Tunable::Enabled => yes_no(config.enabled).to_string(),
            Tunable::Suspended => yes_no(config.suspended).to_string(),
            Tunable::TimesHotplugged => {
                return Ok(self.stats().render_times_hotplugged(self.possible_cores()));
            }
        };
        Ok(value + "\n")
    }

    /// Parse and store a new value. On error nothing changes.
    pub fn write_tunable(&self, key: &str, value: &str) -> Result<()> {
        let tunable = key.parse::<Tunable>()?;
        if !tunable.is_writable() {
            return Err(GovernorError::ReadOnly(tunable.name().to_string()));
        }
        if tunable == Tunable::Enabled {
            return self.set_enabled(parse_bool(tunable, value)?);
        }

        let input = parse_unsigned(tunable, value)?;
        let possible = self.possible_cores().len();
        self.update_config(|config| {
            match tunable {
                Tunable::PollIntervalMs if input == 0 => return Err(invalid(tunable, value)),
                Tunable::PollIntervalMs => {
                    config.poll_interval = Duration::from_millis(u64::from(input));
                }
                Tunable::MinCores => {
                    let cores = input as usize;
                    if cores == 0 || cores > config.max_cores {
                        return Err(invalid(tunable, value));
                    }
                    config.min_cores = cores;
                }
                Tunable::MaxCores => {
                    let cores = input as usize;
                    if cores < config.min_cores || cores > possible {
                        return Err(invalid(tunable, value));
                    }
                    config.max_cores = cores;
                }
                Tunable::RampUpPercent => config.ramp_up_percent = input,
                Tunable::RampDownPercent => config.ramp_down_percent = input,
                Tunable::CyclesBeforeAdd => config.cycles_before_add = input,
                Tunable::CyclesBeforeRemove => config.cycles_before_remove = input,
                Tunable::Enabled | Tunable::Suspended | Tunable::TimesHotplugged => {
                    return Err(GovernorError::ReadOnly(tunable.name().to_string()));
                }
            }
            Ok(())
        })?;

        info!("{tunable} = {input}");
        Ok(())
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "Y" } else { "N" }
}

fn invalid(tunable: Tunable, value: &str) -> GovernorError {
    GovernorError::invalid(tunable.name(), value.trim())
}

fn parse_unsigned(tunable: Tunable, value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| invalid(tunable, value))
}

fn parse_bool(tunable: Tunable, value: &str) -> Result<bool> {
    match value.trim() {
        "1" | "y" | "Y" | "true" | "on" => Ok(true),
        "0" | "n" | "N" | "false" | "off" => Ok(false),
        _ => Err(invalid(tunable, value)),
    }
}
