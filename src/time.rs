//! Timing primitives shared by the gascard driver, valves, pumps and
//! schedulers.
//!
//! Nothing in the control path sleeps.  Every wait is a [`Deadline`]
//! compared against the current [`Instant`] on each tick, so the super-loop
//! stays live and the side effects of a tick are easy to audit.
//!
//! Wall-clock scheduling (feed times, sample times) uses [`TimeOfDay`],
//! which is all the RTC alarm hardware understands anyway.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════
//  Monotonic time
// ═══════════════════════════════════════════════════════════════

/// Milliseconds since boot.  Monotonic, never wraps in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant(u64);

impl Instant {
    pub const ZERO: Self = Self(0);

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`.  Saturates to zero if `earlier` is in
    /// the future.
    pub fn duration_since(self, earlier: Instant) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// `self + d`, saturating at `u64::MAX` milliseconds.
    pub fn saturating_add(self, d: Duration) -> Self {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(ms))
    }
}

/// A point in monotonic time after which something is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    armed_at: Instant,
    at: Instant,
}

impl Deadline {
    /// Deadline that expires `duration` after `now`.
    pub fn after(now: Instant, duration: Duration) -> Self {
        Self {
            armed_at: now,
            at: now.saturating_add(duration),
        }
    }

    /// Deadline that is already due.
    pub fn expired(now: Instant) -> Self {
        Self { armed_at: now, at: now }
    }

    pub fn is_elapsed(&self, now: Instant) -> bool {
        now >= self.at
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.at.duration_since(now)
    }

    /// Time since the deadline was armed.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.duration_since(self.armed_at)
    }

    pub fn expires_at(&self) -> Instant {
        self.at
    }
}

// ═══════════════════════════════════════════════════════════════
//  Wall-clock time of day
// ═══════════════════════════════════════════════════════════════

const SECS_PER_DAY: u32 = 24 * 60 * 60;

/// A wall-clock time of day (local time), second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "heapless::String<8>", into = "heapless::String<8>")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
    second: u8,
}

impl TimeOfDay {
    /// Returns `None` if any field is out of range.
    pub const fn new(hour: u8, minute: u8, second: u8) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return None;
        }
        Some(Self { hour, minute, second })
    }

    pub fn from_secs_of_day(secs: u32) -> Self {
        let secs = secs % SECS_PER_DAY;
        Self {
            hour: (secs / 3600) as u8,
            minute: ((secs / 60) % 60) as u8,
            second: (secs % 60) as u8,
        }
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn second(self) -> u8 {
        self.second
    }

    pub fn secs_of_day(self) -> u32 {
        self.hour as u32 * 3600 + self.minute as u32 * 60 + self.second as u32
    }

    /// Time until the next occurrence of `self` strictly after `now`.
    /// Equal times wrap to tomorrow.
    pub fn until_from(self, now: TimeOfDay) -> Duration {
        let target = self.secs_of_day();
        let current = now.secs_of_day();
        let delta = if target > current {
            target - current
        } else {
            SECS_PER_DAY - current + target
        };
        Duration::from_secs(delta as u64)
    }

    /// The earliest of `times` occurring after `now`, with the countdown to
    /// it.  `None` if `times` is empty.
    pub fn next_after(times: &[TimeOfDay], now: TimeOfDay) -> Option<(TimeOfDay, Duration)> {
        times
            .iter()
            .map(|t| (*t, t.until_from(now)))
            .min_by_key(|(_, wait)| *wait)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.second == 0 {
            write!(f, "{:02}:{:02}", self.hour, self.minute)
        } else {
            write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
        }
    }
}

/// Error returned when a `HH:MM[:SS]` string cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDayParseError;

impl fmt::Display for TimeOfDayParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected HH:MM or HH:MM:SS")
    }
}

impl FromStr for TimeOfDay {
    type Err = TimeOfDayParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let mut field = |required: bool| -> Result<u8, TimeOfDayParseError> {
            match parts.next() {
                Some(p) => p.parse::<u8>().map_err(|_| TimeOfDayParseError),
                None if required => Err(TimeOfDayParseError),
                None => Ok(0),
            }
        };
        let hour = field(true)?;
        let minute = field(true)?;
        let second = field(false)?;
        if parts.next().is_some() {
            return Err(TimeOfDayParseError);
        }
        Self::new(hour, minute, second).ok_or(TimeOfDayParseError)
    }
}

impl TryFrom<heapless::String<8>> for TimeOfDay {
    type Error = TimeOfDayParseError;

    fn try_from(s: heapless::String<8>) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for heapless::String<8> {
    fn from(t: TimeOfDay) -> Self {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        // "HH:MM:SS" is exactly 8 bytes, always fits.
        let _ = write!(s, "{t}");
        s
    }
}
