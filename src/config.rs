//! System configuration parameters
//!
//! All tunable parameters for the GasMux controller.  The same struct is
//! ingested from JSON (boot config, cloud sync) or one string key at a time
//! from the remote environment (`apply_env`).  Every path validates before
//! a change is accepted; consumers never re-check ranges.
//!
//! Pump and valve indices are 1-based everywhere outside this module.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::drivers::valve::ValveMode;
use crate::error::ConfigError;
use crate::time::TimeOfDay;

/// Pump channels on the motor driver board.
pub const MAX_PUMPS: usize = 4;
/// Valve channels on the valve driver board.
pub const MAX_VALVES: usize = 4;
/// Longest sampling sequence, repeats included.
pub const MAX_SEQUENCE: usize = 16;
/// Most wall-clock times in one schedule.
pub const MAX_TIMES: usize = 8;

pub type TimeList = heapless::Vec<TimeOfDay, MAX_TIMES>;
pub type PumpSequence = heapless::Vec<u8, MAX_SEQUENCE>;

/// When sampling cycles start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSchedule {
    /// At each wall-clock time, via the RTC alarm.
    Times(TimeList),
    /// Every `n` seconds since the previous cycle start.
    IntervalSecs(u32),
}

/// Per-valve settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValveConfig {
    /// Channel fitted and under control.
    pub enabled: bool,
    pub mode: ValveMode,
    /// Manual-mode target: `true` = open.
    pub manual_open: bool,
}

impl Default for ValveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ValveMode::Auto,
            manual_open: false,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    // --- Sampling ---
    /// Pumps fitted (1..=MAX_PUMPS).  0 = no pump driver.
    pub pumps: u8,
    /// Per-pump speed used during a sampling cycle (0.0–1.0).
    pub pump_speed: [f32; MAX_PUMPS],
    /// Pumps visited per cycle, in order.  Repeats are intentional.
    pub pump_sequence: PumpSequence,
    /// How long each pump runs before its reading is captured (seconds).
    pub pump_duration_secs: u32,
    pub sample_schedule: SampleSchedule,

    // --- Dosing ---
    pub valves: [ValveConfig; MAX_VALVES],
    /// Wall-clock times at which every Auto valve runs a pulse train.
    pub feed_times: TimeList,
    /// Pulses per feed.
    pub pulses: u16,
    /// Seconds open per pulse.
    pub valve_open_secs: u32,
    /// Seconds closed per pulse.
    pub valve_close_secs: u32,

    // --- Timing ---
    /// Super-loop period (milliseconds)
    pub control_loop_interval_ms: u32,
    /// Telemetry report interval (seconds)
    pub telemetry_interval_secs: u32,
    /// Task watchdog timeout (seconds)
    pub watchdog_timeout_secs: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut valves = [ValveConfig::default(); MAX_VALVES];
        valves[0].enabled = true;

        Self {
            // Sampling: three sample points, pump 4 flushes between them
            pumps: 4,
            pump_speed: [0.6; MAX_PUMPS],
            pump_sequence: PumpSequence::from_slice(&[1, 4, 2, 4, 3, 4]).unwrap_or_default(),
            pump_duration_secs: 60,
            sample_schedule: SampleSchedule::IntervalSecs(3600),

            // Dosing
            valves,
            feed_times: ["10:00", "18:00"]
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
            pulses: 24,
            valve_open_secs: 10,
            valve_close_secs: 120,

            // Timing
            control_loop_interval_ms: 100, // 10 Hz
            telemetry_interval_secs: 10,
            watchdog_timeout_secs: 10,
        }
    }
}

impl SystemConfig {
    /// Parse and validate a JSON document.  Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|_| ConfigError::Parse("JSON"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values.  Never clamps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        use ConfigError::ValidationFailed as Invalid;

        if self.pumps as usize > MAX_PUMPS {
            return Err(Invalid("pumps: more than fitted channels"));
        }
        if self
            .pump_speed
            .iter()
            .any(|s| !s.is_finite() || !(0.0..=1.0).contains(s))
        {
            return Err(Invalid("pump_speed: must be within 0.0..=1.0"));
        }
        if self.pumps > 0 && self.pump_sequence.is_empty() {
            return Err(Invalid("pump_sequence: empty"));
        }
        if self
            .pump_sequence
            .iter()
            .any(|&i| i == 0 || i > self.pumps)
        {
            return Err(Invalid("pump_sequence: index is not a fitted pump"));
        }
        if self.pump_duration_secs == 0 {
            return Err(Invalid("pump_duration_secs: must be > 0"));
        }
        match &self.sample_schedule {
            SampleSchedule::Times(t) if t.is_empty() => {
                return Err(Invalid("sample_schedule: no times"));
            }
            SampleSchedule::IntervalSecs(0) => {
                return Err(Invalid("sample_schedule: interval must be > 0"));
            }
            _ => {}
        }
        if self.pulses == 0 {
            return Err(Invalid("pulses: must be > 0"));
        }
        if self.valve_open_secs == 0 || self.valve_close_secs == 0 {
            return Err(Invalid("valve durations: must be > 0"));
        }
        if self.control_loop_interval_ms == 0 || self.control_loop_interval_ms > 1000 {
            return Err(Invalid("control_loop_interval_ms: must be within 1..=1000"));
        }
        if self.telemetry_interval_secs == 0 {
            return Err(Invalid("telemetry_interval_secs: must be > 0"));
        }
        if self.watchdog_timeout_secs < 2 {
            return Err(Invalid("watchdog_timeout_secs: must be >= 2"));
        }
        Ok(())
    }

    /// Apply one remote environment variable.
    ///
    /// Keys follow the deployed naming (`pulses`, `feed-times`,
    /// `valve-open-duration`, `v01-mode`, `pump2-speed`, ...).  The change
    /// is applied to a copy and validated; on error `self` is untouched.
    pub fn apply_env(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut next = self.clone();
        next.set_env(key, value.trim())?;
        next.validate()?;
        *self = next;
        Ok(())
    }

    fn set_env(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "pulses" => self.pulses = number(value, "pulses")?,
            "feed-times" => self.feed_times = time_list(value)?,
            "valve-open-duration" => self.valve_open_secs = number(value, "valve-open-duration")?,
            "valve-close-duration" => {
                self.valve_close_secs = number(value, "valve-close-duration")?;
            }
            "pump-sequence" => self.pump_sequence = pump_sequence(value)?,
            "pump-duration" => self.pump_duration_secs = number(value, "pump-duration")?,
            "sample-times" => self.sample_schedule = SampleSchedule::Times(time_list(value)?),
            "sample-interval" => {
                self.sample_schedule =
                    SampleSchedule::IntervalSecs(number(value, "sample-interval")?);
            }
            _ => return self.set_indexed_env(key, value),
        }
        Ok(())
    }

    /// `vNN-mode`, `vNN-manual-pos` and `pumpN-speed`.
    fn set_indexed_env(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Some(rest) = key.strip_prefix("pump") {
            let (idx, field) = rest.split_once('-').ok_or(ConfigError::UnknownKey)?;
            if field != "speed" {
                return Err(ConfigError::UnknownKey);
            }
            let slot = slot(idx, MAX_PUMPS)?;
            self.pump_speed[slot] = number(value, "pump speed")?;
            return Ok(());
        }

        if let Some(rest) = key.strip_prefix('v') {
            let (idx, field) = rest.split_once('-').ok_or(ConfigError::UnknownKey)?;
            let slot = slot(idx, MAX_VALVES)?;
            let valve = &mut self.valves[slot];
            match (field, value) {
                ("mode", "auto") => valve.mode = ValveMode::Auto,
                ("mode", "manual") => valve.mode = ValveMode::Manual,
                ("mode", _) => return Err(ConfigError::Parse("valve mode")),
                ("manual-pos", "open") => valve.manual_open = true,
                ("manual-pos", "closed") => valve.manual_open = false,
                ("manual-pos", _) => return Err(ConfigError::Parse("valve position")),
                _ => return Err(ConfigError::UnknownKey),
            }
            return Ok(());
        }

        Err(ConfigError::UnknownKey)
    }

    /// Number of the fitted pumps, as a 1-based range.
    pub fn pump_indices(&self) -> core::ops::RangeInclusive<u8> {
        1..=self.pumps
    }
}

fn number<T: FromStr>(value: &str, what: &'static str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Parse(what))
}

/// 1-based index text to a 0-based array slot.
fn slot(idx: &str, len: usize) -> Result<usize, ConfigError> {
    let idx: usize = idx.parse().map_err(|_| ConfigError::UnknownKey)?;
    if idx == 0 || idx > len {
        return Err(ConfigError::ValidationFailed("index out of range"));
    }
    Ok(idx - 1)
}

/// Items of a list value: `10:00,18:00`, `10:00 18:00` or `["10:00", "18:00"]`.
fn list_items(value: &str) -> impl Iterator<Item = &str> {
    value
        .trim_matches(|c| c == '[' || c == ']')
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim_matches('"'))
        .filter(|s| !s.is_empty())
}

fn time_list(value: &str) -> Result<TimeList, ConfigError> {
    let mut out = TimeList::new();
    for item in list_items(value) {
        let t = item.parse().map_err(|_| ConfigError::Parse("time of day"))?;
        out.push(t)
            .map_err(|_| ConfigError::ValidationFailed("too many times"))?;
    }
    Ok(out)
}

fn pump_sequence(value: &str) -> Result<PumpSequence, ConfigError> {
    let mut out = PumpSequence::new();
    for item in list_items(value) {
        let idx = number(item, "pump index")?;
        out.push(idx)
            .map_err(|_| ConfigError::ValidationFailed("pump_sequence: too long"))?;
    }
    Ok(out)
}
