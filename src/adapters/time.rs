//! Clock adapters.
//!
//! - [`SystemClock`]: monotonic uptime.  `esp_timer_get_time()` on the
//!   board, `std::time::Instant` on the host.
//! - [`SoftRtc`]: wall-clock time of day with a software daily alarm.
//!   On the board it reads the system time (set from the console or SNTP);
//!   on the host it runs from a settable base plus elapsed uptime.

use log::info;

use crate::app::ports::{MonotonicClock, RealTimeClock};
use crate::time::{Instant, TimeOfDay};

// ───────────────────────────────────────────────────────────────
// Monotonic clock
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }
}

impl MonotonicClock for SystemClock {
    #[cfg(target_os = "espidf")]
    fn now(&self) -> Instant {
        // SAFETY: esp_timer_get_time reads the monotonic high-resolution
        // timer; callable from any task.
        let us = unsafe { esp_idf_sys::esp_timer_get_time() };
        Instant::from_millis(us.max(0) as u64 / 1_000)
    }

    #[cfg(not(target_os = "espidf"))]
    fn now(&self) -> Instant {
        Instant::from_millis(self.start.elapsed().as_millis() as u64)
    }
}

// ───────────────────────────────────────────────────────────────
// Wall clock with daily alarm
// ───────────────────────────────────────────────────────────────

pub struct SoftRtc {
    alarm: Option<TimeOfDay>,
    /// Time of day at the previous alarm check, to detect crossing.
    last_seen: Option<TimeOfDay>,
    fired: bool,
    #[cfg(not(target_os = "espidf"))]
    base: Option<(TimeOfDay, std::time::Instant)>,
}

impl Default for SoftRtc {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftRtc {
    pub fn new() -> Self {
        Self {
            alarm: None,
            last_seen: None,
            fired: false,
            #[cfg(not(target_os = "espidf"))]
            base: None,
        }
    }

    pub fn alarm(&self) -> Option<TimeOfDay> {
        self.alarm
    }
}

/// Whether the clock passed `alarm` going from `prev` to `now`.
fn crossed(prev: TimeOfDay, now: TimeOfDay, alarm: TimeOfDay) -> bool {
    if prev <= now {
        prev < alarm && alarm <= now
    } else {
        // Midnight in between.
        alarm > prev || alarm <= now
    }
}

impl RealTimeClock for SoftRtc {
    #[cfg(target_os = "espidf")]
    fn time_of_day(&self) -> Option<TimeOfDay> {
        use core::ptr;
        let mut tv = esp_idf_sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: gettimeofday writes into a valid local timeval.
        if unsafe { esp_idf_sys::gettimeofday(&mut tv, ptr::null_mut()) } != 0 {
            return None;
        }
        // Anything before 2020-01-01 means the clock was never set.
        const EPOCH_2020: i64 = 1_577_836_800;
        if (tv.tv_sec as i64) < EPOCH_2020 {
            return None;
        }
        let secs = tv.tv_sec as esp_idf_sys::time_t;
        // SAFETY: tm is plain data; localtime_r fills it from `secs`.
        let mut tm: esp_idf_sys::tm = unsafe { core::mem::zeroed() };
        if unsafe { esp_idf_sys::localtime_r(&secs, &mut tm) }.is_null() {
            return None;
        }
        TimeOfDay::new(tm.tm_hour as u8, tm.tm_min as u8, tm.tm_sec.min(59) as u8)
    }

    #[cfg(not(target_os = "espidf"))]
    fn time_of_day(&self) -> Option<TimeOfDay> {
        let (base, at) = self.base?;
        let secs = base.secs_of_day() as u64 + at.elapsed().as_secs();
        Some(TimeOfDay::from_secs_of_day((secs % 86_400) as u32))
    }

    fn set_alarm(&mut self, at: TimeOfDay) {
        self.alarm = Some(at);
        self.fired = false;
        self.last_seen = self.time_of_day();
    }

    fn alarm_fired(&mut self) -> bool {
        let Some(alarm) = self.alarm else {
            return false;
        };
        let Some(now) = self.time_of_day() else {
            return false;
        };
        if !self.fired {
            self.fired = match self.last_seen {
                Some(prev) => crossed(prev, now, alarm),
                None => now == alarm,
            };
        }
        self.last_seen = Some(now);
        self.fired
    }

    fn clear_alarm(&mut self) {
        self.alarm = None;
        self.fired = false;
    }

    #[cfg(target_os = "espidf")]
    fn set_time_of_day(&mut self, now: TimeOfDay) {
        // Keep the date if one is set, otherwise start from 2020-01-01.
        const EPOCH_2020: i64 = 1_577_836_800;
        let mut tv = esp_idf_sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: gettimeofday/settimeofday take valid local pointers.
        unsafe { esp_idf_sys::gettimeofday(&mut tv, core::ptr::null_mut()) };
        let current = (tv.tv_sec as i64).max(EPOCH_2020);
        let midnight = current - current.rem_euclid(86_400);
        tv.tv_sec = (midnight + i64::from(now.secs_of_day())) as _;
        tv.tv_usec = 0;
        unsafe { esp_idf_sys::settimeofday(&tv, core::ptr::null()) };
        self.last_seen = Some(now);
        info!("RTC: time set to {now}");
    }

    #[cfg(not(target_os = "espidf"))]
    fn set_time_of_day(&mut self, now: TimeOfDay) {
        self.base = Some((now, std::time::Instant::now()));
        self.last_seen = Some(now);
        info!("RTC: time set to {now}");
    }
}
